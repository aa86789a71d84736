use std::fmt;

/// AWS access credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl Credentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
        }
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    /// Reads `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and the optional
    /// `AWS_SESSION_TOKEN`. Returns `None` unless both keys are set.
    pub fn from_env() -> Option<Self> {
        let access = non_empty_var("AWS_ACCESS_KEY_ID")?;
        let secret = non_empty_var("AWS_SECRET_ACCESS_KEY")?;
        let mut credentials = Self::new(access, secret);
        credentials.session_token = non_empty_var("AWS_SESSION_TOKEN");
        Some(credentials)
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Masks a secret for display, keeping the last four characters.
pub fn mask(secret: &str) -> String {
    let count = secret.chars().count();
    if count <= 4 {
        return "****".into();
    }
    let tail: String = secret.chars().skip(count - 4).collect();
    format!("****{tail}")
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &mask(&self.secret_access_key))
            .field("session_token", &self.session_token.as_deref().map(mask))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_masks_secrets() {
        let creds = Credentials::new("AKIDEXAMPLE", "wJalrXUtnFEMI/K7MDENG").with_session_token("tok");
        let out = format!("{creds:?}");
        assert!(out.contains("AKIDEXAMPLE"));
        assert!(out.contains("****DENG"));
        assert!(!out.contains("wJalrXUtnFEMI"));
        assert!(!out.contains("\"tok\""));
    }

    #[test]
    fn mask_short_values() {
        assert_eq!(mask("abc"), "****");
        assert_eq!(mask("abcdefgh"), "****efgh");
    }
}
