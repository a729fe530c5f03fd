use crate::value::Value;
use std::collections::HashMap;

/// Handle to a live frame in an [`Environment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameId(usize);

#[derive(Debug, Default)]
struct Frame {
    bindings: HashMap<String, Value>,
    parent: Option<FrameId>,
}

/// Arena of variable frames.
///
/// Frames are created and released in strict LIFO order (block entry/exit,
/// function call/return), so the arena is a stack and a handle stays valid
/// for as long as the scope that created it is running. Parent links need
/// not point at the frame directly below: a function frame links straight
/// to the top-level frame.
#[derive(Debug)]
pub struct Environment {
    frames: Vec<Frame>,
}

impl Environment {
    /// The top-level frame. Always present.
    pub const GLOBAL: FrameId = FrameId(0);

    pub fn new() -> Self {
        Self {
            frames: vec![Frame::default()],
        }
    }

    /// Open a new frame chained to `parent`.
    pub fn push(&mut self, parent: FrameId) -> FrameId {
        let id = FrameId(self.frames.len());
        self.frames.push(Frame {
            bindings: HashMap::new(),
            parent: Some(parent),
        });
        id
    }

    /// Release `frame` together with anything opened after it.
    pub fn pop(&mut self, frame: FrameId) {
        debug_assert!(frame != Self::GLOBAL, "the top-level frame is never released");
        debug_assert_eq!(frame.0 + 1, self.frames.len(), "frames released out of order");
        self.frames.truncate(frame.0.max(1));
    }

    /// Number of live frames, the top-level frame included.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Bind `name` in `frame`. Returns `false` if `frame` already binds it.
    pub fn declare(&mut self, frame: FrameId, name: &str, value: Value) -> bool {
        let bindings = &mut self.frames[frame.0].bindings;
        if bindings.contains_key(name) {
            return false;
        }
        bindings.insert(name.to_string(), value);
        true
    }

    /// Frame holding the binding `name` is resolved to from `frame`.
    pub fn resolve(&self, frame: FrameId, name: &str) -> Option<FrameId> {
        let mut current = Some(frame);
        while let Some(id) = current {
            let frame = &self.frames[id.0];
            if frame.bindings.contains_key(name) {
                return Some(id);
            }
            current = frame.parent;
        }
        None
    }

    pub fn get(&self, frame: FrameId, name: &str) -> Option<&Value> {
        let owner = self.resolve(frame, name)?;
        self.frames[owner.0].bindings.get(name)
    }

    /// Binding of `name` in exactly `frame`, without walking outward.
    pub fn local_mut(&mut self, frame: FrameId, name: &str) -> Option<&mut Value> {
        self.frames.get_mut(frame.0)?.bindings.get_mut(name)
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}
