/// How a supervised child's run was classified, per the common monitor
/// contract: success, application-level error, killed for exceeding its
/// timeout, or died for any other reason (panic, OOM kill, crash).
#[derive(Debug)]
pub enum Outcome {
    Success,
    TaskError { message: String },
    TimedOut { signal: i32 },
    Died { signal: Option<i32> },
}

impl Outcome {
    pub fn kill_signal(&self) -> Option<i32> {
        match self {
            Outcome::TimedOut { signal } => Some(*signal),
            Outcome::Died { signal } => *signal,
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}
