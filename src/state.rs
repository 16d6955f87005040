//! presentation state for the chat surface.

use bevy::prelude::*;

use crate::normalize::normalize_math_delimiters;

/// shown in place of the buffer when a stream fails; any partially streamed
/// text is discarded.
pub const STREAM_FAILURE_NOTICE: &str = "⚠️ error streaming response from the provider.";

/// single source of truth for the page: prompt text, streamed output buffer,
/// and the busy flag gating re-submission.
///
/// per submission the state walks `idle -> streaming -> {done, failed} -> idle`;
/// `busy` is true exactly while streaming. all mutation happens on the main
/// schedule (submit system + drain system), so updates are serialized by
/// construction and uis can rely on bevy change detection for re-rendering.
#[derive(Resource, Clone, Debug, Default)]
pub struct ChatState {
    prompt: String,
    output: String,
    busy: bool,
}

impl ChatState {
    /// replace the prompt text. always succeeds.
    pub fn set_prompt(&mut self, text: impl Into<String>) {
        self.prompt = text.into();
    }

    /// the prompt text, for in-place editing by an input control.
    pub fn prompt_mut(&mut self) -> &mut String {
        &mut self.prompt
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// the raw output buffer as streamed so far.
    pub fn output(&self) -> &str {
        &self.output
    }

    /// true from submission start until stream completion or failure. the
    /// sole signal for disabling the submit trigger.
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// the buffer as handed to the markdown renderer: math delimiters
    /// normalized, nothing else touched.
    pub fn rendered(&self) -> String {
        normalize_math_delimiters(&self.output)
    }

    /// submit-side transition. rejects (no state change) when the trimmed
    /// prompt is empty or a stream is already in flight; otherwise resets
    /// the buffer and raises `busy`.
    #[must_use]
    pub fn begin_submission(&mut self) -> bool {
        if self.busy || self.prompt.trim().is_empty() {
            return false;
        }
        self.output.clear();
        self.busy = true;
        true
    }

    /// append one streamed fragment. fragments arrive and are applied in
    /// stream order; the buffer only ever grows within a session.
    pub fn apply_delta(&mut self, text: &str) {
        self.output.push_str(text);
    }

    /// normal end of stream.
    pub fn finish(&mut self) {
        self.busy = false;
    }

    /// stream failure: the fixed notice replaces whatever was streamed.
    pub fn fail(&mut self) {
        self.output.clear();
        self.output.push_str(STREAM_FAILURE_NOTICE);
        self.busy = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn submission_resets_buffer_and_raises_busy() {
        let mut state = ChatState::default();
        state.set_prompt("explain transformers");
        state.apply_delta("stale output");

        assert!(state.begin_submission());
        assert!(state.is_busy());
        assert_eq!(state.output(), "");
    }

    #[test]
    fn blank_prompt_is_rejected_without_state_change() {
        let mut state = ChatState::default();
        state.apply_delta("previous answer");

        for blank in ["", "   ", "\n\t "] {
            state.set_prompt(blank);
            assert!(!state.begin_submission());
            assert!(!state.is_busy());
            assert_eq!(state.output(), "previous answer");
        }
    }

    #[test]
    fn submission_while_busy_is_rejected() {
        let mut state = ChatState::default();
        state.set_prompt("first");
        assert!(state.begin_submission());
        state.apply_delta("in flight");

        state.set_prompt("second");
        assert!(!state.begin_submission());
        assert!(state.is_busy());
        assert_eq!(state.output(), "in flight");
    }

    #[test]
    fn finish_clears_busy_and_keeps_output() {
        let mut state = ChatState::default();
        state.set_prompt("hi");
        assert!(state.begin_submission());
        state.apply_delta("Hello, world");
        state.finish();

        assert!(!state.is_busy());
        assert_eq!(state.output(), "Hello, world");

        // back in idle: the next submission is accepted again
        assert!(state.begin_submission());
        assert_eq!(state.output(), "");
    }

    #[test]
    fn failure_replaces_partial_output_with_notice() {
        let mut state = ChatState::default();
        state.set_prompt("hi");
        assert!(state.begin_submission());
        state.apply_delta("Par");
        state.fail();

        assert!(!state.is_busy());
        assert_eq!(state.output(), STREAM_FAILURE_NOTICE);
    }

    #[test]
    fn rendered_normalizes_math_delimiters() {
        let mut state = ChatState::default();
        state.apply_delta(r"the root is \(x = 2\), since \[x^2 = 4\]");

        assert_eq!(state.rendered(), r"the root is $x = 2$, since $$x^2 = 4$$");
        // raw buffer is untouched by the read path
        assert_eq!(state.output(), r"the root is \(x = 2\), since \[x^2 = 4\]");
    }
}
