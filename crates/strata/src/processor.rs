//! # Options Processor
//!
//! A per-manager hook that may rewrite the options and context of each
//! request before any cache or loader work starts, or reject it outright.

use crate::context::RequestContext;
use crate::identifier::ResourceId;
use crate::options::RequestOptions;

/// Options and context a request proceeds with
#[derive(Debug, Clone, Default)]
pub struct OptionsResult {
    pub options: RequestOptions,
    pub context: RequestContext,
}

impl OptionsResult {
    pub fn new(options: RequestOptions, context: RequestContext) -> Self {
        Self { options, context }
    }
}

pub trait OptionsProcessor: Send + Sync {
    /// `None` rejects the request.
    fn process(
        &self,
        identifier: &ResourceId,
        options: RequestOptions,
        context: &RequestContext,
    ) -> Option<OptionsResult>;
}

type ProcessFn =
    dyn Fn(&ResourceId, RequestOptions, &RequestContext) -> Option<OptionsResult> + Send + Sync;

/// Options processor backed by a closure
pub struct FnOptionsProcessor {
    func: Box<ProcessFn>,
}

impl FnOptionsProcessor {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&ResourceId, RequestOptions, &RequestContext) -> Option<OptionsResult>
            + Send
            + Sync
            + 'static,
    {
        Self {
            func: Box::new(func),
        }
    }
}

impl OptionsProcessor for FnOptionsProcessor {
    fn process(
        &self,
        identifier: &ResourceId,
        options: RequestOptions,
        context: &RequestContext,
    ) -> Option<OptionsResult> {
        (self.func)(identifier, options, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextValue;

    #[test]
    fn test_closure_processor_rewrites_and_rejects() {
        let processor = FnOptionsProcessor::new(|id: &ResourceId, options, ctx: &RequestContext| {
            if id.as_str().ends_with(".tiff") {
                return None;
            }
            Some(OptionsResult::new(
                options | RequestOptions::RETRY_FAILED,
                ctx.clone().with("seen", ContextValue::Flag(true)),
            ))
        });

        let ctx = RequestContext::new();
        let result = processor
            .process(&ResourceId::from("http://x/a.png"), RequestOptions::empty(), &ctx)
            .unwrap();
        assert!(result.options.contains(RequestOptions::RETRY_FAILED));
        assert_eq!(result.context.flag("seen"), Some(true));
        assert!(ctx.is_empty());

        assert!(processor
            .process(&ResourceId::from("http://x/a.tiff"), RequestOptions::empty(), &ctx)
            .is_none());
    }
}
