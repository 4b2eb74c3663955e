//! Unit tests for chunking and truncation policies.

use clawless::pipeline::chunker::{smart_chunks, truncate_with_ellipsis};

#[test]
fn short_text_is_one_chunk() {
    assert_eq!(smart_chunks("hello", 4096), vec!["hello"]);
}

#[test]
fn long_text_is_hard_split_without_newlines() {
    let long = "a".repeat(5000);
    let chunks = smart_chunks(&long, 4096);
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].chars().count(), 4096);
    assert_eq!(chunks[1].chars().count(), 904);
    assert_eq!(chunks.concat(), long);
}

#[test]
fn split_prefers_newline_boundaries() {
    let text = format!("{}\n{}", "a".repeat(100), "b".repeat(100));
    let chunks = smart_chunks(&text, 150);
    assert_eq!(chunks, vec!["a".repeat(100), "b".repeat(100)]);
    // The newline acts as the chunk separator: joining restores the text.
    assert_eq!(chunks.join("\n"), text);
}

#[test]
fn chunk_boundaries_are_char_safe() {
    let text = "é".repeat(200);
    let chunks = smart_chunks(&text, 150);
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks.concat(), text);
    for chunk in &chunks {
        assert!(chunk.chars().count() <= 150);
    }
}

#[test]
fn truncation_respects_the_cap_including_ellipsis() {
    let text = "x".repeat(100);
    let truncated = truncate_with_ellipsis(&text, 50);
    assert_eq!(truncated.chars().count(), 50);
    assert!(truncated.ends_with('…'));
}

#[test]
fn truncation_leaves_short_text_alone() {
    assert_eq!(truncate_with_ellipsis("short", 50), "short");
    // Exactly at the cap: unchanged, no ellipsis.
    let exact = "y".repeat(50);
    assert_eq!(truncate_with_ellipsis(&exact, 50), exact);
}
