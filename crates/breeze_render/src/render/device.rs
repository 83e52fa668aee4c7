//! # Device Context
//!
//! The narrow slice of the graphics API the scheduling core and its
//! renderables draw through. Backends implement [`DeviceContext`] on top of
//! their immediate context; [`CommandRecorder`] captures the command stream
//! instead, for headless runs and tests.

/// Identifier of an external render-target pipe a perspective draws into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipeId(pub u32);

/// Shader pass selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassBinding<'a> {
    /// Effect name
    pub effect: &'a str,
    /// Technique index within the effect
    pub technique: u32,
    /// Pass index within the technique
    pub pass: u32,
}

/// A single non-indexed draw
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrawCall {
    /// Number of vertices per instance
    pub vertex_count: u32,
    /// Number of instances
    pub instance_count: u32,
    /// First instance id, visible to shaders
    pub first_instance: u32,
}

/// Draw submission interface of the graphics backend
pub trait DeviceContext {
    /// Bind an effect pass for subsequent draws
    fn bind_pass(&mut self, binding: &PassBinding<'_>);

    /// Upload constant data to a slot
    fn set_constants(&mut self, slot: u32, data: &[u8]);

    /// Issue a draw
    fn draw(&mut self, draw: DrawCall);
}

/// A command captured by [`CommandRecorder`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCommand {
    /// Effect pass bound
    BindPass {
        /// Effect name
        effect: String,
        /// Technique index
        technique: u32,
        /// Pass index
        pass: u32,
    },
    /// Constants uploaded
    SetConstants {
        /// Constant slot
        slot: u32,
        /// Uploaded bytes
        data: Vec<u8>,
    },
    /// Draw issued
    Draw(DrawCall),
}

/// Device context recording every command it receives
#[derive(Debug, Default)]
pub struct CommandRecorder {
    commands: Vec<DeviceCommand>,
}

impl CommandRecorder {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded commands in submission order
    pub fn commands(&self) -> &[DeviceCommand] {
        &self.commands
    }

    /// Recorded draws in submission order
    pub fn draws(&self) -> impl Iterator<Item = &DrawCall> + '_ {
        self.commands.iter().filter_map(|command| match command {
            DeviceCommand::Draw(draw) => Some(draw),
            _ => None,
        })
    }

    /// Number of recorded draws
    pub fn draw_count(&self) -> usize {
        self.draws().count()
    }

    /// Drop all recorded commands
    pub fn clear(&mut self) {
        self.commands.clear();
    }
}

impl DeviceContext for CommandRecorder {
    fn bind_pass(&mut self, binding: &PassBinding<'_>) {
        self.commands.push(DeviceCommand::BindPass {
            effect: binding.effect.to_string(),
            technique: binding.technique,
            pass: binding.pass,
        });
    }

    fn set_constants(&mut self, slot: u32, data: &[u8]) {
        self.commands.push(DeviceCommand::SetConstants {
            slot,
            data: data.to_vec(),
        });
    }

    fn draw(&mut self, draw: DrawCall) {
        self.commands.push(DeviceCommand::Draw(draw));
    }
}
