//! Pluggable challenge/response validation.
//!
//! The router owns the registration state machine; a [`Validator`] only
//! answers three questions: what to ask next, what to do with a response,
//! and whether the attempt has authenticated. Credential schemes live
//! entirely behind this seam.

use bytes::Bytes;

/// One in-progress validation attempt.
pub trait Validator: Send {
    /// Whether the attempt has authenticated successfully so far.
    fn authenticated(&self) -> bool;

    /// The next challenge to put to the session, or `None` when the
    /// validator has nothing left to ask.
    ///
    /// `None` with `authenticated() == false` means the attempt failed.
    fn next_challenge(&mut self) -> Option<Bytes>;

    /// Feed the session's response to the most recent challenge.
    fn submit_response(&mut self, response: Bytes);

    /// The user id this scheme selected, if it selects one.
    ///
    /// Most schemes return `None` and let the router mint a fresh id.
    fn chosen_user(&self) -> Option<arena_protocol::UserId> {
        None
    }
}

/// Factory creating one [`Validator`] per registration attempt.
pub trait ValidatorFactory: Send + Sync {
    /// Create a fresh validator for a new attempt.
    fn create_validator(&self) -> Box<dyn Validator>;
}

impl<F> ValidatorFactory for F
where
    F: Fn() -> Box<dyn Validator> + Send + Sync,
{
    fn create_validator(&self) -> Box<dyn Validator> {
        self()
    }
}
