//! Backend-neutral command recording.
//!
//! A [`CommandRecording`] borrows a slot's allocator mutably for as long as it
//! is open, so a slot can never have two recordings in flight. Closing it with
//! [`finish`](CommandRecording::finish) yields a [`CommandList`] that a
//! [`CommandQueue`](crate::CommandQueue) consumes.

use std::fmt;

use crate::backend::Backend;

/// Usage state of a back-buffer image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceState {
    /// Owned by the presentation engine.
    Present,
    /// Writable as a colour attachment.
    RenderTarget,
}

/// One recorded command.
pub enum Command<'a, B: Backend> {
    /// State transition barrier on a back-buffer image.
    Transition {
        image: &'a B::Image,
        before: ResourceState,
        after: ResourceState,
    },
    /// Fills a render target with a solid colour.
    ClearRenderTarget { view: &'a B::View, color: [f32; 4] },
}

impl<B: Backend> fmt::Debug for Command<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Transition { before, after, .. } => f
                .debug_struct("Transition")
                .field("before", before)
                .field("after", after)
                .finish(),
            Command::ClearRenderTarget { color, .. } => f
                .debug_struct("ClearRenderTarget")
                .field("color", color)
                .finish(),
        }
    }
}

/// An open command recording against one allocator.
pub struct CommandRecording<'a, B: Backend> {
    allocator: &'a mut B::Allocator,
    commands: Vec<Command<'a, B>>,
}

impl<'a, B: Backend> CommandRecording<'a, B> {
    /// Opens a recording. The allocator stays borrowed until the list is executed.
    pub fn begin(allocator: &'a mut B::Allocator) -> Self {
        Self {
            allocator,
            commands: Vec::with_capacity(4),
        }
    }

    /// Records a state transition barrier.
    pub fn transition(
        &mut self,
        image: &'a B::Image,
        before: ResourceState,
        after: ResourceState,
    ) -> &mut Self {
        self.commands.push(Command::Transition {
            image,
            before,
            after,
        });
        self
    }

    /// Records a render-target clear.
    pub fn clear_render_target(&mut self, view: &'a B::View, color: [f32; 4]) -> &mut Self {
        self.commands
            .push(Command::ClearRenderTarget { view, color });
        self
    }

    /// Closes the recording.
    pub fn finish(self) -> CommandList<'a, B> {
        CommandList {
            allocator: self.allocator,
            commands: self.commands,
        }
    }
}

/// A closed command list, ready for submission.
pub struct CommandList<'a, B: Backend> {
    allocator: &'a mut B::Allocator,
    commands: Vec<Command<'a, B>>,
}

impl<'a, B: Backend> CommandList<'a, B> {
    /// The recorded commands in order.
    pub fn commands(&self) -> &[Command<'a, B>] {
        &self.commands
    }

    /// Splits the list into its allocator and commands.
    pub fn into_parts(self) -> (&'a mut B::Allocator, Vec<Command<'a, B>>) {
        (self.allocator, self.commands)
    }
}

impl<B: Backend> fmt::Debug for CommandList<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.commands.iter()).finish()
    }
}
