#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

/// Commands whose argument is kept verbatim under `command_args["value"]`.
pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "structured_model",
        action: "set_structured_model",
    },
    CommandSpec {
        command: "grounded_model",
        action: "set_grounded_model",
    },
    CommandSpec {
        command: "chat_model",
        action: "set_chat_model",
    },
    CommandSpec {
        command: "language",
        action: "set_language",
    },
];

pub(crate) const SINGLE_PATH_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "select",
        action: "select_image",
    },
    CommandSpec {
        command: "scan",
        action: "scan",
    },
];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "identify",
        action: "show_identify",
    },
    CommandSpec {
        command: "chat",
        action: "show_chat",
    },
    CommandSpec {
        command: "discard",
        action: "discard_image",
    },
    CommandSpec {
        command: "insights",
        action: "refresh_insights",
    },
    CommandSpec {
        command: "history",
        action: "show_history",
    },
    CommandSpec {
        command: "help",
        action: "help",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
    },
    CommandSpec {
        command: "exit",
        action: "quit",
    },
];

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/identify",
    "/chat",
    "/select",
    "/scan",
    "/discard",
    "/insights",
    "/history",
    "/structured_model",
    "/grounded_model",
    "/chat_model",
    "/language",
    "/help",
    "/quit",
];
