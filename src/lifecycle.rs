use serde::Serialize;

/// Lifecycle of the supervised daemon as seen by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
    Restarting,
}

/// Outcome of asking the state machine to move to a new state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Apply,
    Unchanged,
    Forbidden,
}

impl LifecycleState {
    pub fn transition_to(self, next: LifecycleState) -> Transition {
        use LifecycleState::*;

        if self == next {
            return Transition::Unchanged;
        }
        let allowed = match (self, next) {
            // Kill is accepted from anywhere.
            (_, Stopped) => true,
            (Stopped, Starting) => true,
            (Starting, Running) | (Starting, Restarting) => true,
            (Running, Stopping) | (Running, Restarting) => true,
            (Stopping, Restarting) => true,
            (Restarting, Starting) => true,
            _ => false,
        };
        if allowed {
            Transition::Apply
        } else {
            Transition::Forbidden
        }
    }

    /// Entering this state ends the current API epoch.
    pub fn ends_session(self) -> bool {
        matches!(
            self,
            LifecycleState::Stopped | LifecycleState::Stopping | LifecycleState::Restarting
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use LifecycleState::*;

    const ALL: [LifecycleState; 5] = [Stopped, Starting, Running, Stopping, Restarting];

    #[test]
    fn stopped_never_jumps_to_running_or_stopping() {
        assert_eq!(Stopped.transition_to(Running), Transition::Forbidden);
        assert_eq!(Stopped.transition_to(Stopping), Transition::Forbidden);
        assert_eq!(Stopped.transition_to(Restarting), Transition::Forbidden);
    }

    #[test]
    fn every_state_can_be_killed() {
        for state in ALL {
            let expected = if state == Stopped {
                Transition::Unchanged
            } else {
                Transition::Apply
            };
            assert_eq!(state.transition_to(Stopped), expected, "{state:?}");
        }
    }

    #[test]
    fn restart_cycle_is_allowed() {
        let cycle = [Running, Restarting, Starting, Running];
        for pair in cycle.windows(2) {
            assert_eq!(pair[0].transition_to(pair[1]), Transition::Apply);
        }
    }

    #[test]
    fn late_probe_cannot_resurrect_a_stopping_daemon() {
        assert_eq!(Stopping.transition_to(Running), Transition::Forbidden);
        assert_eq!(Restarting.transition_to(Running), Transition::Forbidden);
    }

    #[test]
    fn applied_walks_never_contain_forbidden_edges() {
        // Drive every sequence of three requested states from Stopped and keep
        // only what the machine applies; the observed walk must stay legal.
        for a in ALL {
            for b in ALL {
                for c in ALL {
                    let mut current = Stopped;
                    let mut observed = vec![current];
                    for next in [a, b, c] {
                        if current.transition_to(next) == Transition::Apply {
                            current = next;
                            observed.push(current);
                        }
                    }
                    for pair in observed.windows(2) {
                        assert_ne!((pair[0], pair[1]), (Stopped, Running));
                        assert_ne!((pair[0], pair[1]), (Stopped, Stopping));
                    }
                }
            }
        }
    }

    #[test]
    fn session_ending_states() {
        assert!(Stopped.ends_session());
        assert!(Stopping.ends_session());
        assert!(Restarting.ends_session());
        assert!(!Running.ends_session());
        assert!(!Starting.ends_session());
    }
}
