#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

/// Commands whose whole remainder is one free-text argument.
pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "theme",
        action: "set_theme",
    },
    CommandSpec {
        command: "angle",
        action: "set_camera_angle",
    },
    CommandSpec {
        command: "ideas",
        action: "scene_ideas",
    },
];

/// Commands taking shell-quoted words (paths, category names, indices).
pub(crate) const WORD_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "upload",
        action: "upload",
    },
    CommandSpec {
        command: "batch",
        action: "batch",
    },
    CommandSpec {
        command: "select",
        action: "toggle_scenes",
    },
    CommandSpec {
        command: "regen",
        action: "regenerate",
    },
    CommandSpec {
        command: "remove",
        action: "remove_image",
    },
];

pub(crate) const SINGLE_PATH_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "save",
        action: "save",
    },
    CommandSpec {
        command: "album",
        action: "album",
    },
];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "scenes",
        action: "generate_scenes",
    },
    CommandSpec {
        command: "shuffle",
        action: "shuffle",
    },
    CommandSpec {
        command: "status",
        action: "status",
    },
    CommandSpec {
        command: "themes",
        action: "list_themes",
    },
    CommandSpec {
        command: "reset",
        action: "reset",
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

pub(crate) const CUSTOM_COMMAND: CommandSpec = CommandSpec {
    command: "custom",
    action: "custom",
};

pub(crate) const EDIT_COMMAND: CommandSpec = CommandSpec {
    command: "edit",
    action: "edit",
};

pub const SESSION_HELP_COMMANDS: &[&str] = &[
    "/upload <paths>",
    "/remove <index>",
    "/themes",
    "/theme <key>",
    "/angle <name>",
    "/batch [categories]",
    "/shuffle",
    "/custom [count] <prompt>",
    "/ideas <idea>",
    "/select <scene numbers>",
    "/scenes",
    "/regen <batch|scene|custom> <key> [original|fallback]",
    "/edit <caption> <instruction>",
    "/status",
    "/save <dir>",
    "/album <path>",
    "/reset",
    "/quit",
];
