//! Unit tests for the bounded stderr tail ring.

use clawless::runtime::supervisor::StderrTail;

#[test]
fn tail_never_exceeds_its_bound() {
    let mut tail = StderrTail::new(10);
    for _ in 0..50 {
        tail.append("abcdefg");
        assert!(tail.len_chars() <= 10, "bound must hold after every append");
    }
}

#[test]
fn tail_keeps_the_most_recent_output() {
    let mut tail = StderrTail::new(5);
    tail.append("0123456789");
    assert_eq!(tail.snapshot(), "56789");
}

#[test]
fn eviction_respects_char_boundaries() {
    let mut tail = StderrTail::new(4);
    tail.append("éééééé");
    assert_eq!(tail.snapshot(), "éééé");
    assert_eq!(tail.len_chars(), 4);
}

#[test]
fn clear_empties_the_tail() {
    let mut tail = StderrTail::new(100);
    tail.append("some noise");
    tail.clear();
    assert_eq!(tail.snapshot(), "");
    assert_eq!(tail.len_chars(), 0);
}
