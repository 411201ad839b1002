//! Pane identifiers and the process-wide `state_id` allocator.

use std::sync::atomic::{AtomicU64, Ordering};

/// Reduces a pane id to its canonical form.
///
/// iTerm2 reports sessions either as a bare UUID or prefixed with the
/// window/tab position (`w0t1p1:UUID`, as in `$ITERM_SESSION_ID`). Both map
/// to the UUID. Namespaced ids (`iterm2:UUID`, `tmux:%3`) and plain tmux
/// pane ids (`%3`) are kept as-is.
pub fn normalize_pane_id(pane_id: &str) -> String {
    let trimmed = pane_id.trim();
    if let Some((prefix, rest)) = trimmed.split_once(':') {
        if is_iterm_position(prefix) && !rest.is_empty() {
            return rest.to_string();
        }
    }
    trimmed.to_string()
}

fn is_iterm_position(prefix: &str) -> bool {
    // w<digits>t<digits>p<digits>
    let mut rest = prefix;
    for marker in ['w', 't', 'p'] {
        let Some(stripped) = rest.strip_prefix(marker) else {
            return false;
        };
        let digits = stripped.chars().take_while(|c| c.is_ascii_digit()).count();
        if digits == 0 {
            return false;
        }
        rest = &stripped[digits..];
    }
    rest.is_empty()
}

/// Shortened id for log lines.
pub fn short_id(pane_id: &str) -> &str {
    match pane_id.char_indices().nth(8) {
        Some((index, _)) => &pane_id[..index],
        None => pane_id,
    }
}

/// Monotonic counter handing out one id per successful transition, shared by
/// every pane of one engine.
#[derive(Debug)]
pub struct StateIdAllocator {
    next: AtomicU64,
}

impl StateIdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn allocate(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    /// Ensures future ids are strictly greater than `seen`.
    pub fn observe(&self, seen: u64) {
        self.next.fetch_max(seen.saturating_add(1), Ordering::SeqCst);
    }

    /// The id the next `allocate` will return.
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }
}

impl Default for StateIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
