//! Progress reporting threaded through every stage.

/// Sink for human-readable progress messages.
pub trait Reporter {
    fn info(&mut self, msg: &str);
    fn warn(&mut self, msg: &str);
    fn error(&mut self, msg: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
}

/// Buffers messages in arrival order.
///
/// Upload workers each get one and the pipeline replays them into the real
/// reporter once the workers have joined.
#[derive(Debug, Clone, Default)]
pub struct CollectingReporter {
    messages: Vec<(Level, String)>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self, level: Level) -> Vec<&str> {
        self.messages
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m.as_str())
            .collect()
    }

    pub fn infos(&self) -> Vec<&str> {
        self.messages(Level::Info)
    }

    pub fn warns(&self) -> Vec<&str> {
        self.messages(Level::Warn)
    }

    pub fn errors(&self) -> Vec<&str> {
        self.messages(Level::Error)
    }

    pub fn replay_into(self, reporter: &mut dyn Reporter) {
        for (level, msg) in self.messages {
            match level {
                Level::Info => reporter.info(&msg),
                Level::Warn => reporter.warn(&msg),
                Level::Error => reporter.error(&msg),
            }
        }
    }
}

impl Reporter for CollectingReporter {
    fn info(&mut self, msg: &str) {
        self.messages.push((Level::Info, msg.to_string()));
    }

    fn warn(&mut self, msg: &str) {
        self.messages.push((Level::Warn, msg.to_string()));
    }

    fn error(&mut self, msg: &str) {
        self.messages.push((Level::Error, msg.to_string()));
    }
}
