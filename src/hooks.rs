/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

//! Hook table for customizing ICAP responses at well-defined points in a
//! transaction, without writing a full [`crate::registry::Handler`].
//!
//! Mirrors the dispatch/default-value semantics of the original
//! implementation's `Hooks(dict)`: registering a hook under a name that
//! already has one keeps the *first* registered fallback value unless the
//! caller explicitly overrides it, and a hook that panics or otherwise
//! fails at call time falls back to that default rather than taking down
//! the connection.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};

use crate::message::{IcapRequest, IcapResponse};

/// Additional headers to merge into an OPTIONS response.
pub type OptionsHeadersHook = Box<dyn Fn() -> Vec<(String, String)> + Send + Sync>;
/// Returns a custom ISTag payload for a request (request may be absent,
/// e.g. before any transaction has been parsed).
pub type IsTagHook = Box<dyn Fn(Option<&IcapRequest>) -> String + Send + Sync>;
/// Called with a request before it reaches a handler; may mutate it.
pub type BeforeHandlingHook = Box<dyn Fn(&mut IcapRequest) + Send + Sync>;
/// Called with a request and response before serialization; may mutate
/// the response.
pub type BeforeSerializationHook = Box<dyn Fn(&IcapRequest, &mut IcapResponse) + Send + Sync>;

struct Slot<F> {
    func: F,
    default: <F as HookDefault>::Default,
}

/// Helper trait so [`Slot`] can carry a type-appropriate default value per
/// hook kind without a separate enum per hook.
trait HookDefault {
    type Default: Clone;
}

impl HookDefault for OptionsHeadersHook {
    type Default = Vec<(String, String)>;
}
impl HookDefault for IsTagHook {
    type Default = String;
}
impl HookDefault for BeforeHandlingHook {
    type Default = ();
}
impl HookDefault for BeforeSerializationHook {
    type Default = ();
}

/// Dispatch table for the four customization points a transaction passes
/// through.
#[derive(Default)]
pub struct Hooks {
    options_headers: Option<Slot<OptionsHeadersHook>>,
    is_tag: Option<Slot<IsTagHook>>,
    before_handling: Option<Slot<BeforeHandlingHook>>,
    before_serialization: Option<Slot<BeforeSerializationHook>>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the `options_headers` hook. `default` is the value used if
    /// the hook panics; on a second registration under the same name,
    /// `default` is ignored unless `override_default` is `true`, matching
    /// the original's "the first default wins" behavior — it's the sane
    /// fallback e.g. for the ISTag header if a later override misbehaves.
    pub fn set_options_headers(
        &mut self,
        func: OptionsHeadersHook,
        default: Vec<(String, String)>,
        override_default: bool,
    ) {
        let default = match (&self.options_headers, override_default) {
            (Some(existing), false) => existing.default.clone(),
            _ => default,
        };
        self.options_headers = Some(Slot { func, default });
    }

    pub fn set_is_tag(&mut self, func: IsTagHook, default: String, override_default: bool) {
        let default = match (&self.is_tag, override_default) {
            (Some(existing), false) => existing.default.clone(),
            _ => default,
        };
        self.is_tag = Some(Slot { func, default });
    }

    pub fn set_before_handling(&mut self, func: BeforeHandlingHook) {
        self.before_handling = Some(Slot { func, default: () });
    }

    pub fn set_before_serialization(&mut self, func: BeforeSerializationHook) {
        self.before_serialization = Some(Slot { func, default: () });
    }

    /// Invoke the `options_headers` hook, if any, swallowing panics and
    /// returning its registered default instead.
    pub fn options_headers(&self) -> Vec<(String, String)> {
        match &self.options_headers {
            Some(slot) => panic::catch_unwind(AssertUnwindSafe(|| (slot.func)()))
                .unwrap_or_else(|_| slot.default.clone()),
            None => Vec::new(),
        }
    }

    /// Invoke the `is_tag` hook, if any, swallowing panics and returning
    /// its registered default (or `None` if no hook is registered at all,
    /// letting the caller fall back to the engine's own ISTag).
    pub fn is_tag(&self, request: Option<&IcapRequest>) -> Option<String> {
        self.is_tag.as_ref().map(|slot| {
            panic::catch_unwind(AssertUnwindSafe(|| (slot.func)(request)))
                .unwrap_or_else(|_| slot.default.clone())
        })
    }

    /// Invoke the `before_handling` hook, if any. A panicking hook is
    /// swallowed; the request is left as the handler last saw it.
    pub fn before_handling(&self, request: &mut IcapRequest) {
        if let Some(slot) = &self.before_handling {
            let _ = panic::catch_unwind(AssertUnwindSafe(|| (slot.func)(request)));
        }
    }

    /// Invoke the `before_serialization` hook, if any. A panicking hook is
    /// swallowed; the response is left as the handler last produced it.
    pub fn before_serialization(&self, request: &IcapRequest, response: &mut IcapResponse) {
        if let Some(slot) = &self.before_serialization {
            let _ = panic::catch_unwind(AssertUnwindSafe(|| (slot.func)(request, response)));
        }
    }
}
