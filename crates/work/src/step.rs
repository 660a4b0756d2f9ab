//! Steps and chain composition.

use std::fmt;
use std::sync::Arc;

use crate::action::NextAction;
use crate::packet::Packet;

/// Shared reference to an immutable step.
pub type StepRef = Arc<dyn Step>;

/// One unit of an execution chain.
///
/// A step reads and writes the packet, then returns a verdict telling the
/// engine how to continue. Steps must not block the calling thread or spawn
/// work of their own: waiting is always expressed by returning
/// [`NextAction::Suspend`] or [`NextAction::RetryAfter`].
///
/// Steps are immutable once linked into a chain; anything that varies per
/// run lives in the [`Packet`].
pub trait Step: Send + Sync {
    /// Step name (for logging and failure reports).
    fn name(&self) -> &str;

    /// The step that follows this one, if any.
    fn next(&self) -> Option<&StepRef>;

    /// Run the step against the packet.
    fn apply(&self, packet: &mut Packet) -> NextAction;
}

/// A step backed by a closure.
///
/// The closure receives the packet and the step's successor, so it can
/// continue with [`NextAction::proceed`].
pub struct FnStep<F> {
    name: String,
    next: Option<StepRef>,
    func: F,
}

impl<F> FnStep<F>
where
    F: Fn(&mut Packet, Option<&StepRef>) -> NextAction + Send + Sync + 'static,
{
    /// Create a new function step.
    pub fn new(name: impl Into<String>, next: Option<StepRef>, func: F) -> Self {
        Self {
            name: name.into(),
            next,
            func,
        }
    }

    /// Wrap the step into a shared reference.
    pub fn into_ref(self) -> StepRef {
        Arc::new(self)
    }
}

impl<F> Step for FnStep<F>
where
    F: Fn(&mut Packet, Option<&StepRef>) -> NextAction + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn next(&self) -> Option<&StepRef> {
        self.next.as_ref()
    }

    fn apply(&self, packet: &mut Packet) -> NextAction {
        (self.func)(packet, self.next.as_ref())
    }
}

impl<F> fmt::Debug for FnStep<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnStep")
            .field("name", &self.name)
            .field("next", &self.next.as_ref().map(|s| s.name().to_string()))
            .finish()
    }
}

type Link = Box<dyn FnOnce(Option<StepRef>) -> StepRef + Send>;

/// Composes steps front-to-back.
///
/// Because every step holds an immutable reference to its successor, links
/// are collected in order and constructed back-to-front by [`ChainBuilder::build`].
///
/// ```ignore
/// let head = ChainBuilder::new()
///     .then_fn("mark", |packet, next| {
///         packet.put("x", 1);
///         NextAction::proceed(next)
///     })
///     .then(|next| AsyncRequestStep::builder(params, factory).next(next).build())
///     .build();
/// ```
#[derive(Default)]
pub struct ChainBuilder {
    links: Vec<Link>,
}

impl ChainBuilder {
    /// Create an empty chain builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step constructed from its successor.
    #[must_use]
    pub fn then<L>(mut self, link: L) -> Self
    where
        L: FnOnce(Option<StepRef>) -> StepRef + Send + 'static,
    {
        self.links.push(Box::new(link));
        self
    }

    /// Append a closure step.
    #[must_use]
    pub fn then_fn<F>(self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&mut Packet, Option<&StepRef>) -> NextAction + Send + Sync + 'static,
    {
        let name = name.into();
        self.then(move |next| FnStep::new(name, next, func).into_ref())
    }

    /// Number of links collected so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Whether no link has been added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Link the steps and return the head, or `None` for an empty chain.
    #[must_use]
    pub fn build(self) -> Option<StepRef> {
        self.links
            .into_iter()
            .rev()
            .fold(None, |next, link| Some(link(next)))
    }
}

/// Names of the steps in a chain, head first.
#[must_use]
pub fn chain_names(head: &StepRef) -> Vec<String> {
    let mut names = Vec::new();
    let mut cursor = Some(head);
    while let Some(step) = cursor {
        names.push(step.name().to_string());
        cursor = step.next();
    }
    names
}

/// Number of steps in a chain.
#[must_use]
pub fn chain_len(head: &StepRef) -> usize {
    chain_names(head).len()
}
