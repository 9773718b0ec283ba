//! Lifecycle hooks.
//!
//! Hooks attach per definition (directly or through fragment tags) and
//! fire on create, save, and delete. Two shapes exist: by-reference
//! hooks receive only the reference string, full hooks receive the
//! mutable instance. Within one event, every by-reference hook runs
//! before any full hook, in registration order within each shape.
//!
//! Hooks always run outside the registry's connection lock, so a hook
//! may call back into the registry freely.

use std::sync::Arc;

use entorm_core::{Error, Result};

use crate::entity::Entity;

/// Outcome of a single hook invocation.
pub type HookResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// The lifecycle points hooks can attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    /// A fresh instance was created; full hooks may seed default values.
    FillNew,
    /// About to persist; failure aborts the save with no mutation.
    BeforeSave,
    /// Persisted and committed; failure surfaces but cannot roll back.
    AfterSave,
    /// About to delete; failure aborts the delete with no mutation.
    BeforeDelete,
}

impl HookEvent {
    pub(crate) const fn name(self) -> &'static str {
        match self {
            HookEvent::FillNew => "fill-new",
            HookEvent::BeforeSave => "before-save",
            HookEvent::AfterSave => "after-save",
            HookEvent::BeforeDelete => "before-delete",
        }
    }
}

/// One registered hook.
#[derive(Clone)]
pub enum Hook {
    /// Receives the reference string only; cheap, needs no instance.
    ByRef(Arc<dyn Fn(&str) -> HookResult + Send + Sync>),
    /// Receives the mutable instance.
    Full(Arc<dyn Fn(&mut Entity) -> HookResult + Send + Sync>),
}

impl Hook {
    /// Convenience constructor for by-reference hooks.
    pub fn by_ref(f: impl Fn(&str) -> HookResult + Send + Sync + 'static) -> Self {
        Hook::ByRef(Arc::new(f))
    }

    /// Convenience constructor for full-instance hooks.
    pub fn full(f: impl Fn(&mut Entity) -> HookResult + Send + Sync + 'static) -> Self {
        Hook::Full(Arc::new(f))
    }
}

impl std::fmt::Debug for Hook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Hook::ByRef(_) => f.write_str("Hook::ByRef"),
            Hook::Full(_) => f.write_str("Hook::Full"),
        }
    }
}

/// The hooks registered for one definition, per event.
#[derive(Debug, Clone, Default)]
pub(crate) struct HookSet {
    fill_new: Vec<Hook>,
    before_save: Vec<Hook>,
    after_save: Vec<Hook>,
    before_delete: Vec<Hook>,
}

impl HookSet {
    pub(crate) fn add(&mut self, event: HookEvent, hook: Hook) {
        self.slot_mut(event).push(hook);
    }

    pub(crate) fn hooks(&self, event: HookEvent) -> &[Hook] {
        match event {
            HookEvent::FillNew => &self.fill_new,
            HookEvent::BeforeSave => &self.before_save,
            HookEvent::AfterSave => &self.after_save,
            HookEvent::BeforeDelete => &self.before_delete,
        }
    }

    fn slot_mut(&mut self, event: HookEvent) -> &mut Vec<Hook> {
        match event {
            HookEvent::FillNew => &mut self.fill_new,
            HookEvent::BeforeSave => &mut self.before_save,
            HookEvent::AfterSave => &mut self.after_save,
            HookEvent::BeforeDelete => &mut self.before_delete,
        }
    }

    /// True when any full-shaped hook is registered for the event; the
    /// delete path only loads the instance when one is.
    pub(crate) fn has_full(&self, event: HookEvent) -> bool {
        self.hooks(event).iter().any(|h| matches!(h, Hook::Full(_)))
    }

    /// Run the event's hooks: all by-reference first, then all full.
    pub(crate) fn run(
        &self,
        event: HookEvent,
        reference: &str,
        entity: Option<&mut Entity>,
    ) -> Result<()> {
        let fail = |message: String| Error::HookFailure {
            event: event.name(),
            reference: reference.to_string(),
            message,
        };
        for hook in self.hooks(event) {
            if let Hook::ByRef(f) = hook {
                f(reference).map_err(|e| fail(e.to_string()))?;
            }
        }
        if let Some(entity) = entity {
            for hook in self.hooks(event) {
                if let Hook::Full(f) = hook {
                    f(entity).map_err(|e| fail(e.to_string()))?;
                }
            }
        }
        Ok(())
    }
}
