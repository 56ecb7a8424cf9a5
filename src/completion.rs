//! Tab completion over remote directory listings.
//!
//! Completion never goes through the pipeline's in-flight lock: the
//! listing is a one-off execute call that must not touch the working
//! directory or the transcript. The pure parts (splitting the input,
//! matching, cycling) live here; the pipeline owns the network hop.

/// Stored suggestions for cyclic advancement. Valid only while the input
/// still reads exactly as the last completion wrote it.
#[derive(Debug, Clone)]
pub struct TabState {
    suggestions: Vec<String>,
    cursor: usize,
    base: String,
    completed_input: String,
}

impl TabState {
    pub fn suggestions(&self) -> &[String] {
        &self.suggestions
    }

    pub fn completed_input(&self) -> &str {
        &self.completed_input
    }

    /// Advance to the next candidate, wrapping around, and return the
    /// rewritten input line.
    pub fn advance(&mut self) -> String {
        self.cursor = (self.cursor + 1) % self.suggestions.len();
        let input = format!("{}{}", self.base, self.suggestions[self.cursor]);
        self.completed_input = input.clone();
        input
    }
}

/// What to ask the backend, and how to splice the answer back in.
#[derive(Debug, Clone, PartialEq)]
pub struct TabRequest {
    /// One-off listing command, directory-prefixed like every remote call.
    pub command: String,
    /// Input line up to (and including) any directory prefix of the word
    /// being completed.
    pub base: String,
    /// The prefix entries must start with.
    pub search: String,
}

/// Work out the listing request for the current input, or `None` when
/// there is nothing to complete.
pub fn plan(input: &str, current_dir: &str) -> Option<TabRequest> {
    if input.trim().is_empty() {
        return None;
    }
    // The last whitespace-delimited word is the completion target; a
    // trailing space means an empty target that matches everything.
    let target = match input.rfind(char::is_whitespace) {
        Some(i) => &input[i + 1..],
        None => input,
    };
    let (dir_part, search) = match target.rfind('/') {
        Some(i) => (&target[..=i], &target[i + 1..]),
        None => ("", target),
    };
    let list_target = if dir_part.is_empty() { "." } else { dir_part };
    Some(TabRequest {
        // The tracked directory is quoted; it may contain whitespace
        // adopted verbatim from a pwd.
        command: format!("cd '{}' && ls -1a {}", current_dir, list_target),
        base: input[..input.len() - search.len()].to_string(),
        search: search.to_string(),
    })
}

/// Apply a directory listing to the planned completion. Returns the new
/// input line plus the cycling state when there is more than one match;
/// `None` means no matches and no change.
pub fn resolve(req: &TabRequest, listing: &str) -> Option<(String, Option<TabState>)> {
    let lower = req.search.to_lowercase();
    let mut matches: Vec<String> = listing
        .lines()
        .map(str::trim)
        .filter(|e| !e.is_empty() && *e != "." && *e != "..")
        .filter(|e| e.to_lowercase().starts_with(&lower))
        .map(str::to_string)
        .collect();
    if matches.is_empty() {
        return None;
    }
    matches.sort_by(|a, b| a.to_lowercase().cmp(&b.to_lowercase()).then(a.cmp(b)));

    if matches.len() == 1 {
        // Unambiguous: substitute and move on with a trailing space.
        return Some((format!("{}{} ", req.base, matches[0]), None));
    }

    let input = format!("{}{}", req.base, matches[0]);
    let state = TabState {
        suggestions: matches,
        cursor: 0,
        base: req.base.clone(),
        completed_input: input.clone(),
    };
    Some((input, Some(state)))
}
