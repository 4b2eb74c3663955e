//! Unit tests for agent capability profiles.

use std::time::Duration;

use clawless::agent::{AgentKind, AgentProfile, ProfileOptions};

#[test]
fn gemini_acp_args_carry_the_experimental_flag() {
    let profile = AgentProfile::for_kind(
        AgentKind::Gemini,
        ProfileOptions {
            include_directories: vec!["/src".to_owned()],
            approval_mode: Some("auto_edit".to_owned()),
            model: Some("gemini-pro".to_owned()),
            ..ProfileOptions::default()
        },
    );

    let args = profile.acp_args();
    assert_eq!(args[0], "--experimental-acp");
    assert!(args.windows(2).any(|w| w == ["--include-directories", "/src"]));
    assert!(args.windows(2).any(|w| w == ["--approval-mode", "auto_edit"]));
    assert!(args.windows(2).any(|w| w == ["--model", "gemini-pro"]));
}

#[test]
fn opencode_acp_args_use_the_acp_subcommand() {
    let profile = AgentProfile::for_kind(AgentKind::Opencode, ProfileOptions::default());
    assert_eq!(profile.acp_args(), vec!["acp"]);
}

#[test]
fn claude_acp_args_use_permission_mode_vocabulary() {
    let profile = AgentProfile::for_kind(
        AgentKind::Claude,
        ProfileOptions {
            approval_mode: Some("acceptEdits".to_owned()),
            ..ProfileOptions::default()
        },
    );
    let args = profile.acp_args();
    assert!(args.windows(2).any(|w| w == ["--permission-mode", "acceptEdits"]));
}

#[test]
fn prompt_args_end_with_the_prompt_text() {
    let profile = AgentProfile::for_kind(AgentKind::Gemini, ProfileOptions::default());
    let args = profile.prompt_args("scan for TODOs");
    assert_eq!(args[args.len() - 2], "-p");
    assert_eq!(args[args.len() - 1], "scan for TODOs");
}

#[test]
fn prompt_args_use_one_generic_shape_for_every_agent() {
    // ACP mode is agent-specific; one-shot mode is not.
    for kind in [AgentKind::Gemini, AgentKind::Opencode, AgentKind::Claude] {
        let profile = AgentProfile::for_kind(
            kind,
            ProfileOptions {
                include_directories: vec!["/src".to_owned()],
                approval_mode: Some("auto_edit".to_owned()),
                model: Some("m1".to_owned()),
                ..ProfileOptions::default()
            },
        );
        let args = profile.prompt_args("task");

        assert!(
            args.windows(2).any(|w| w == ["--include-directories", "/src"]),
            "{kind:?}: expected --include-directories, got {args:?}"
        );
        assert!(
            args.windows(2).any(|w| w == ["--approval-mode", "auto_edit"]),
            "{kind:?}: expected --approval-mode, got {args:?}"
        );
        assert!(
            args.windows(2).any(|w| w == ["--model", "m1"]),
            "{kind:?}: expected --model, got {args:?}"
        );
        assert!(
            !args.iter().any(|a| a == "--add-dir" || a == "--permission-mode"),
            "{kind:?}: ACP-only flag names must not leak into one-shot argv, got {args:?}"
        );
        assert_eq!(args[args.len() - 2], "-p");
        assert_eq!(args[args.len() - 1], "task");
    }
}

#[test]
fn custom_profiles_use_their_argv_verbatim() {
    let profile = AgentProfile::custom(
        "sh",
        "Stub agent",
        vec!["-c".to_owned(), "echo acp".to_owned()],
        vec!["-c".to_owned(), "echo oneshot".to_owned()],
        ProfileOptions::default(),
    );
    assert_eq!(profile.command(), "sh");
    assert_eq!(profile.acp_args(), vec!["-c", "echo acp"]);
    assert_eq!(
        profile.prompt_args("task"),
        vec!["-c", "echo oneshot", "task"]
    );
}

#[test]
fn log_token_is_lowercase_with_dashes() {
    let profile = AgentProfile::custom(
        "/usr/local/bin/My Agent",
        "My Agent",
        Vec::new(),
        Vec::new(),
        ProfileOptions::default(),
    );
    assert_eq!(profile.log_token(), "my-agent");
}

#[test]
fn kill_grace_defaults_and_overrides() {
    let default = AgentProfile::for_kind(AgentKind::Gemini, ProfileOptions::default());
    assert_eq!(default.kill_grace(), Duration::from_millis(10_000));

    let tuned = AgentProfile::for_kind(
        AgentKind::Gemini,
        ProfileOptions {
            kill_grace: Some(Duration::from_millis(500)),
            ..ProfileOptions::default()
        },
    );
    assert_eq!(tuned.kill_grace(), Duration::from_millis(500));
}
