//! Unit tests for abort-command recognition.

use clawless::orchestrator::is_abort_command;

#[test]
fn bare_commands_match() {
    for cmd in ["abort", "cancel", "stop"] {
        assert!(is_abort_command(cmd), "'{cmd}' must match");
    }
}

#[test]
fn slash_commands_match() {
    for cmd in ["/abort", "/cancel", "/stop"] {
        assert!(is_abort_command(cmd), "'{cmd}' must match");
    }
}

#[test]
fn polite_variants_match() {
    for cmd in ["please abort", "please cancel", "please stop"] {
        assert!(is_abort_command(cmd), "'{cmd}' must match");
    }
}

#[test]
fn matching_is_case_and_punctuation_insensitive() {
    assert!(is_abort_command("ABORT"));
    assert!(is_abort_command("Stop!"));
    assert!(is_abort_command("  please   STOP.  "));
    assert!(is_abort_command("Cancel?"));
}

#[test]
fn ordinary_messages_do_not_match() {
    assert!(!is_abort_command("please stop the presses and write a poem"));
    assert!(!is_abort_command("cancellation policy"));
    assert!(!is_abort_command("what is 2+2?"));
    assert!(!is_abort_command(""));
}
