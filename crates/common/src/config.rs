use std::env;

#[derive(Debug, Clone)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }

    pub fn from_env() -> Self {
        match env::var("ENVIRONMENT")
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
            .as_str()
        {
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn defaults_to_development() {
        unsafe { env::remove_var("ENVIRONMENT") };
        assert!(matches!(Environment::from_env(), Environment::Development));
    }

    #[test]
    #[serial]
    fn reads_production_aliases() {
        for alias in ["production", "prod", "PROD"] {
            unsafe { env::set_var("ENVIRONMENT", alias) };
            assert!(matches!(Environment::from_env(), Environment::Production));
        }
        unsafe { env::remove_var("ENVIRONMENT") };
    }
}
