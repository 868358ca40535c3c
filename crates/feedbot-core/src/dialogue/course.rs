use crate::session::SessionMode;

/// What the course flow should do with one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CourseAction {
    PromptWrite,
    SubmitFeedback { course_key: String, feedback: String },
    RejectWrite,
    PromptRead,
    Lookup { course_key: String },
    Cancel,
    Help,
}

impl CourseAction {
    /// Mode the user ends up in once the action succeeds.
    pub fn next_mode(&self) -> SessionMode {
        match self {
            CourseAction::PromptWrite | CourseAction::RejectWrite => SessionMode::WritePending,
            CourseAction::PromptRead => SessionMode::ReadPending,
            CourseAction::SubmitFeedback { .. }
            | CourseAction::Lookup { .. }
            | CourseAction::Cancel
            | CourseAction::Help => SessionMode::None,
        }
    }
}

fn command(text: &str) -> String {
    text.trim().to_ascii_lowercase()
}

/// Decide the action for `text` given the user's current mode.
///
/// `/write` wins from any mode, then a pending write consumes the message,
/// then `/read`, then a pending read.
pub fn decide(mode: SessionMode, text: &str) -> CourseAction {
    let cmd = command(text);

    if cmd == "/write" {
        return CourseAction::PromptWrite;
    }

    if mode == SessionMode::WritePending {
        if cmd == "/cancel" {
            return CourseAction::Cancel;
        }
        return match parse_feedback_submission(text) {
            Some((course_key, feedback)) => CourseAction::SubmitFeedback {
                course_key,
                feedback,
            },
            None => CourseAction::RejectWrite,
        };
    }

    if cmd == "/read" {
        return CourseAction::PromptRead;
    }

    if mode == SessionMode::ReadPending {
        if cmd == "/cancel" {
            return CourseAction::Cancel;
        }
        let course_key = text.trim();
        if course_key.is_empty() {
            return CourseAction::PromptRead;
        }
        return CourseAction::Lookup {
            course_key: course_key.to_string(),
        };
    }

    CourseAction::Help
}

/// Split "<course key>\n<feedback...>" into its parts.
///
/// `\r`, `\r\n` and the Unicode line and paragraph separators also end a
/// line. The first line is the course key; every following line belongs to the
/// feedback, which keeps its inner line breaks. Both must be non-empty.
pub fn parse_feedback_submission(text: &str) -> Option<(String, String)> {
    let (first, rest) = text
        .trim_start()
        .split_once(|c: char| matches!(c, '\n' | '\r' | '\u{2028}' | '\u{2029}'))?;
    let course_key = first.trim();
    let feedback = rest.trim();
    if course_key.is_empty() || feedback.is_empty() {
        return None;
    }
    Some((course_key.to_string(), feedback.to_string()))
}
