//! Text helpers for status records

/// Keep at most `max` characters of `message`, marking the cut with "..."
pub fn truncate(message: &str, max: usize) -> String {
	match message.char_indices().nth(max) {
		Some((cut, _)) => format!("{}...", &message[..cut]),
		None => message.to_string(),
	}
}


// vim: ts=4
