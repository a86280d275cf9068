//! Retry policies
//!
//! A [`RetryPolicy`] is a reusable description of when to stop trying.
//! [`RetryPolicy::start`] turns it into a [`RetryControl`], the stateful
//! object one orchestration consults after each failed publish.
//!
//! Once a control has said "stop" it keeps saying so, even if a deadline
//! policy's clock would allow another attempt.

use std::time::{Duration, Instant};

/// When to give up on a conflicted scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryPolicy {
    /// At most this many attempts in total, the first included
    Attempts(u32),
    /// Keep trying while the clock has not passed this instant
    Deadline(Instant),
    /// Keep trying for this long after the orchestration starts
    Within(Duration),
    /// Never stop on its own
    Unconditional,
    /// Every member must allow another attempt
    ///
    /// `Unconditional` members abstain. The combination continues only if at
    /// least one member votes to continue and none votes to stop.
    All(Vec<RetryPolicy>),
}

impl RetryPolicy {
    /// `n` attempts in total
    pub fn attempts(n: u32) -> Self {
        RetryPolicy::Attempts(n)
    }

    /// Until a fixed instant
    pub fn until(deadline: Instant) -> Self {
        RetryPolicy::Deadline(deadline)
    }

    /// For a duration measured from [`start`](Self::start)
    pub fn within(duration: Duration) -> Self {
        RetryPolicy::Within(duration)
    }

    /// Until success
    pub fn unconditional() -> Self {
        RetryPolicy::Unconditional
    }

    /// Combine with another policy; both must allow a further attempt
    pub fn and(self, other: RetryPolicy) -> Self {
        match self {
            RetryPolicy::All(mut members) => {
                members.push(other);
                RetryPolicy::All(members)
            }
            first => RetryPolicy::All(vec![first, other]),
        }
    }

    /// Begin one orchestration under this policy
    pub fn start(&self) -> RetryControl {
        RetryControl {
            rule: Rule::from_policy(self, Instant::now()),
            stopped: false,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::Attempts(3)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Vote {
    Continue,
    Stop,
    Abstain,
}

#[derive(Debug, Clone)]
enum Rule {
    Attempts(u32),
    Deadline(Instant),
    Unconditional,
    All(Vec<Rule>),
}

impl Rule {
    fn from_policy(policy: &RetryPolicy, started: Instant) -> Self {
        match policy {
            RetryPolicy::Attempts(n) => Rule::Attempts(*n),
            RetryPolicy::Deadline(at) => Rule::Deadline(*at),
            RetryPolicy::Within(d) => match started.checked_add(*d) {
                Some(at) => Rule::Deadline(at),
                None => Rule::Unconditional,
            },
            RetryPolicy::Unconditional => Rule::Unconditional,
            RetryPolicy::All(members) => {
                Rule::All(members.iter().map(|m| Rule::from_policy(m, started)).collect())
            }
        }
    }

    fn vote(&self, attempts_so_far: u32) -> Vote {
        match self {
            Rule::Attempts(n) if attempts_so_far < *n => Vote::Continue,
            Rule::Attempts(_) => Vote::Stop,
            Rule::Deadline(at) if Instant::now() <= *at => Vote::Continue,
            Rule::Deadline(_) => Vote::Stop,
            Rule::Unconditional => Vote::Abstain,
            Rule::All(members) => {
                let mut any_continue = false;
                for member in members {
                    match member.vote(attempts_so_far) {
                        Vote::Stop => return Vote::Stop,
                        Vote::Continue => any_continue = true,
                        Vote::Abstain => {}
                    }
                }
                if any_continue {
                    Vote::Continue
                } else {
                    Vote::Stop
                }
            }
        }
    }
}

/// Per-orchestration retry state
#[derive(Debug, Clone)]
pub struct RetryControl {
    rule: Rule,
    stopped: bool,
}

impl RetryControl {
    /// Whether another attempt may follow `attempts_so_far` attempts
    ///
    /// Deadlines are checked against the clock on every call.
    pub fn should_continue(&mut self, attempts_so_far: u32) -> bool {
        if self.stopped {
            return false;
        }
        let go = !matches!(self.rule.vote(attempts_so_far), Vote::Stop);
        if !go {
            self.stopped = true;
        }
        go
    }

    /// Whether this control has already refused an attempt
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}
