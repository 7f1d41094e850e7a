//! Interactive session: turns, reply streaming, and the controller loop.

mod controller;
mod input;
mod stream;
mod turn;

pub use controller::{
    DEFAULT_POLL_INTERVAL, SessionController, SessionEnd, SessionOptions, SessionState,
};
pub use input::{InputEvent, LineInput, StdinLines};
pub use stream::{
    DisplayToken, EventSender, RESPONSE_CHANNEL_CAPACITY, RemoteResponder, Responder,
    ResponseEvent, ResponseStream,
};
pub use turn::{
    ASK_PROFILE_REQUEST, EXIT_COMMANDS, Turn, TurnOutcome, TurnRequest, first_request_text,
    is_exit_command,
};
