use std::path::Path;

use crate::core::auth::LaunchIdentity;

/// Client command line. Offline and authenticated sets differ only in the
/// auth mode and the two token arguments.
pub fn build_game_args(app_dir: &Path, user_dir: &Path, java: &Path, identity: &LaunchIdentity) -> Vec<String> {
    let mut args = vec![
        "--app-dir".to_string(),
        app_dir.to_string_lossy().into_owned(),
        "--user-dir".to_string(),
        user_dir.to_string_lossy().into_owned(),
        "--java-exec".to_string(),
        java.to_string_lossy().into_owned(),
        "--name".to_string(),
        identity.name.clone(),
        "--auth-mode".to_string(),
        identity.mode().as_str().to_string(),
        "--uuid".to_string(),
        identity.uuid.to_string(),
    ];

    if let Some(tokens) = &identity.tokens {
        args.extend([
            "--identity-token".to_string(),
            tokens.identity_token.clone(),
            "--session-token".to_string(),
            tokens.session_token.clone(),
        ]);
    }

    args
}

/// Argument list with token values masked, for logs.
pub fn redacted(args: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(args.len());
    let mut mask_next = false;
    for arg in args {
        if mask_next {
            out.push("***".to_string());
            mask_next = false;
            continue;
        }
        mask_next = arg == "--identity-token" || arg == "--session-token";
        out.push(arg.clone());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::auth::SessionTokens;
    use uuid::Uuid;

    fn identity() -> LaunchIdentity {
        LaunchIdentity::offline("Steve", Uuid::parse_str("6f1c2a4e-8d7b-4a5c-9e3f-1b2c3d4e5f60").unwrap())
    }

    #[test]
    fn offline_args_carry_only_uuid() {
        let args = build_game_args(
            Path::new("/games/release/latest"),
            Path::new("/games/release/latest/UserData"),
            Path::new("/jre/bin/java"),
            &identity(),
        );
        assert_eq!(
            args,
            vec![
                "--app-dir",
                "/games/release/latest",
                "--user-dir",
                "/games/release/latest/UserData",
                "--java-exec",
                "/jre/bin/java",
                "--name",
                "Steve",
                "--auth-mode",
                "offline",
                "--uuid",
                "6f1c2a4e-8d7b-4a5c-9e3f-1b2c3d4e5f60",
            ]
        );
    }

    #[test]
    fn authenticated_args_add_tokens_and_redact_them() {
        let mut identity = identity();
        identity.tokens = Some(SessionTokens {
            identity_token: "id-secret".into(),
            session_token: "session-secret".into(),
        });
        let args = build_game_args(Path::new("a"), Path::new("u"), Path::new("j"), &identity);

        assert!(args.windows(2).any(|w| w == ["--auth-mode", "authenticated"]));
        assert!(args.windows(2).any(|w| w == ["--identity-token", "id-secret"]));
        assert!(args.windows(2).any(|w| w == ["--session-token", "session-secret"]));

        let logged = redacted(&args).join(" ");
        assert!(!logged.contains("secret"));
        assert!(logged.contains("--session-token ***"));
    }
}
