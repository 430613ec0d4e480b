//! Centralized host event and command names.
//! Prevents typos between the parser, the dispatcher and the JSON output.

/// Event names written on stdout as `{"event": ..., "payload": ...}`
pub mod events {
    pub const SNAPSHOT: &str = "snapshot";
    pub const TASK_SAVED: &str = "task-saved";
    pub const DAY_COMPLETED: &str = "day-completed";
    pub const SUMMARY: &str = "summary";
    pub const ERROR: &str = "error";
    pub const DB_RECOVERED: &str = "db-recovered-from-corruption";
}

/// Command verbs read from stdin, one per line
pub mod commands {
    pub const LOGIN: &str = "login";
    pub const LOGOUT: &str = "logout";
    pub const ADD: &str = "add";
    pub const EDIT: &str = "edit";
    pub const DELETE: &str = "delete";
    pub const START: &str = "start";
    pub const STOP: &str = "stop";
    pub const HIDE: &str = "hide";
    pub const SHOW: &str = "show";
    pub const DONE: &str = "done";
    pub const STATUS: &str = "status";
    pub const SUMMARY: &str = "summary";
    pub const QUIT: &str = "quit";
}
