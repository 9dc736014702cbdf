//! Keyboard commands and the key queue shared with the presentation side.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Oldest unrecognized keys are dropped beyond this many pending entries
pub const MAX_PENDING_KEYS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    ToggleBbox,
    ToggleLandmarks,
    ToggleHeadPose,
    ToggleNormalizedImage,
    ToggleTemplateModel,
    ToggleGazeVector,
    Calibrate,
    TogglePipeline,
    Quit,
}

/// A key written either as a single character or as a raw key code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyCode {
    Code(i32),
    Char(char),
}

impl KeyCode {
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn code(self) -> i32 {
        match self {
            Self::Code(code) => code,
            // Unicode scalar values fit in i32
            Self::Char(c) => u32::from(c) as i32,
        }
    }
}

/// Key code for each command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyBindings {
    pub toggle_bbox: KeyCode,
    pub toggle_landmarks: KeyCode,
    pub toggle_head_pose: KeyCode,
    pub toggle_normalized_image: KeyCode,
    pub toggle_template_model: KeyCode,
    pub toggle_gaze_vector: KeyCode,
    pub calibrate: KeyCode,
    pub toggle_pipeline: KeyCode,
    pub quit: KeyCode,
}

impl Default for KeyBindings {
    fn default() -> Self {
        Self {
            toggle_bbox: KeyCode::Char('b'),
            toggle_landmarks: KeyCode::Char('l'),
            toggle_head_pose: KeyCode::Char('h'),
            toggle_normalized_image: KeyCode::Char('n'),
            toggle_template_model: KeyCode::Char('t'),
            toggle_gaze_vector: KeyCode::Char('g'),
            calibrate: KeyCode::Char('c'),
            toggle_pipeline: KeyCode::Char('p'),
            quit: KeyCode::Char('q'),
        }
    }
}

impl KeyBindings {
    fn table(&self) -> [(KeyCode, Command); 9] {
        [
            (self.toggle_bbox, Command::ToggleBbox),
            (self.toggle_landmarks, Command::ToggleLandmarks),
            (self.toggle_head_pose, Command::ToggleHeadPose),
            (self.toggle_normalized_image, Command::ToggleNormalizedImage),
            (self.toggle_template_model, Command::ToggleTemplateModel),
            (self.toggle_gaze_vector, Command::ToggleGazeVector),
            (self.calibrate, Command::Calibrate),
            (self.toggle_pipeline, Command::TogglePipeline),
            (self.quit, Command::Quit),
        ]
    }

    #[must_use]
    pub fn command_for(&self, key: i32) -> Option<Command> {
        self.table()
            .into_iter()
            .find(|(code, _)| code.code() == key)
            .map(|(_, command)| command)
    }

    /// Two commands bound to the same key
    #[must_use]
    pub fn find_conflict(&self) -> Option<(Command, Command)> {
        let table = self.table();
        table.iter().enumerate().find_map(|(i, (code, command))| {
            table[i + 1..]
                .iter()
                .find(|(other, _)| other.code() == code.code())
                .map(|(_, other_command)| (*command, *other_command))
        })
    }
}

/// Pending key codes, oldest first
#[derive(Debug, Clone, Default)]
pub struct CommandQueue {
    keys: VecDeque<i32>,
}

impl CommandQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: i32) {
        if self.keys.len() >= MAX_PENDING_KEYS {
            if let Some(dropped) = self.keys.pop_front() {
                log::warn!("Key queue full, dropping key code {dropped}");
            }
        }
        self.keys.push_back(key);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Keys still pending, oldest first
    pub fn pending(&self) -> impl Iterator<Item = i32> + '_ {
        self.keys.iter().copied()
    }

    /// Dequeue every key bound to a command, in order. Each entry present
    /// when called is peeked once; unbound keys keep their relative order.
    pub fn drain_recognized(&mut self, bindings: &KeyBindings) -> Vec<Command> {
        let mut commands = Vec::new();
        let mut index = 0;
        for _ in 0..self.keys.len() {
            match self.keys.get(index).and_then(|&key| bindings.command_for(key)) {
                Some(command) => {
                    self.keys.remove(index);
                    commands.push(command);
                }
                None => index += 1,
            }
        }
        commands
    }
}
