//! Console command parsing for the headless client

use shared::Packet;

/// A line typed by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Ask the server to move our entity
    Move,
    /// Ask the server for the next free color
    Color,
    /// Print every replicated entity
    List,
    Quit,
}

impl ConsoleCommand {
    pub const HELP: &'static str = "Commands: move (m), color (c), list (l), quit (q)";

    pub fn parse(line: &str) -> Option<Self> {
        match line.trim().to_ascii_lowercase().as_str() {
            "move" | "m" => Some(ConsoleCommand::Move),
            "color" | "colour" | "c" => Some(ConsoleCommand::Color),
            "list" | "l" => Some(ConsoleCommand::List),
            "quit" | "exit" | "q" => Some(ConsoleCommand::Quit),
            _ => None,
        }
    }

    /// Request packet for commands the server handles
    pub fn to_packet(self) -> Option<Packet> {
        match self {
            ConsoleCommand::Move => Some(Packet::MoveRequest),
            ConsoleCommand::Color => Some(Packet::ColorChangeRequest),
            ConsoleCommand::List | ConsoleCommand::Quit => None,
        }
    }
}
