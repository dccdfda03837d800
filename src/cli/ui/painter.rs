use owo_colors::{OwoColorize, Style as OwoStyle};

use crate::session::ConnectionState;

/// Applies colour and style to terminal text.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Painter {
    use_colour: bool,
}

impl Painter {
    pub(crate) fn new(use_colour: bool) -> Self {
        Self { use_colour }
    }

    pub(crate) fn heading<T: AsRef<str>>(&self, text: T) -> String {
        self.paint(text.as_ref(), OwoStyle::new().bold().cyan())
    }

    pub(crate) fn success<T: AsRef<str>>(&self, text: T) -> String {
        self.paint(text.as_ref(), OwoStyle::new().bold().green())
    }

    pub(crate) fn warning<T: AsRef<str>>(&self, text: T) -> String {
        self.paint(text.as_ref(), OwoStyle::new().bold().yellow())
    }

    pub(crate) fn failure<T: AsRef<str>>(&self, text: T) -> String {
        self.paint(text.as_ref(), OwoStyle::new().bold().red())
    }

    pub(crate) fn muted<T: AsRef<str>>(&self, text: T) -> String {
        self.paint(text.as_ref(), OwoStyle::new().dimmed())
    }

    pub(crate) fn value<T: AsRef<str>>(&self, text: T) -> String {
        self.paint(text.as_ref(), OwoStyle::new().bold())
    }

    /// Colours a connection state by how healthy it is.
    pub(crate) fn state(&self, state: ConnectionState) -> String {
        let label = state.to_string();
        match state {
            ConnectionState::Connected => self.success(label),
            ConnectionState::Connecting | ConnectionState::Disconnecting => self.warning(label),
            ConnectionState::Failed => self.failure(label),
            ConnectionState::Disconnected => self.muted(label),
        }
    }

    fn paint(&self, text: &str, style: OwoStyle) -> String {
        if self.use_colour {
            format!("{}", text.style(style))
        } else {
            text.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::connected(ConnectionState::Connected, "connected")]
    #[case::failed(ConnectionState::Failed, "failed")]
    #[case::idle(ConnectionState::Disconnected, "disconnected")]
    fn plain_state_is_unstyled(#[case] state: ConnectionState, #[case] expected: &str) {
        assert_eq!(expected, Painter::new(false).state(state));
    }

    #[rstest]
    #[case::connected(ConnectionState::Connected)]
    #[case::connecting(ConnectionState::Connecting)]
    #[case::failed(ConnectionState::Failed)]
    fn coloured_state_is_styled(#[case] state: ConnectionState) {
        let styled = Painter::new(true).state(state);
        assert_ne!(state.to_string(), styled);
        assert!(styled.contains(&state.to_string()));
    }

    #[test]
    fn failure_is_styled_only_with_colour() {
        assert_eq!("boom", Painter::new(false).failure("boom"));
        assert_ne!("boom", Painter::new(true).failure("boom"));
    }
}
