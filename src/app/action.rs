//! User actions read from the terminal.

use std::str::FromStr;

/// Action types the user can trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    SignIn,
    SignOut,
    Refresh,
    CancelSignIn,
    Quit,
}

impl FromStr for Action {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        match line.trim().to_ascii_lowercase().as_str() {
            "signin" | "login" => Ok(Self::SignIn),
            "signout" | "logout" => Ok(Self::SignOut),
            "refresh" | "r" => Ok(Self::Refresh),
            "cancel" => Ok(Self::CancelSignIn),
            "quit" | "exit" | "q" => Ok(Self::Quit),
            other => Err(format!("Unknown command: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_actions() {
        assert_eq!("signin".parse(), Ok(Action::SignIn));
        assert_eq!("  SignOut \n".parse(), Ok(Action::SignOut));
        assert_eq!("refresh".parse(), Ok(Action::Refresh));
        assert_eq!("cancel".parse(), Ok(Action::CancelSignIn));
        assert_eq!("q".parse(), Ok(Action::Quit));
    }

    #[test]
    fn test_parse_unknown() {
        let result: Result<Action, _> = "delete".parse();
        assert_eq!(result, Err("Unknown command: delete".to_string()));
    }
}
