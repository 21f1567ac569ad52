//! # Transform Pipelines
//!
//! Documents travel through a request as a stream of [`Envelope`]s. During create and
//! update an envelope carries the raw `incoming` payload (and, for updates, the loaded
//! `doc`); during finalize it carries the `doc` read from the model. A [`Pipeline`] is an
//! ordered list of [`Transform`]s that user middleware extends before the stream is
//! driven, so the same transforms apply whether a request holds zero, one or many items.
//!
//! Every stage yields `Result` items: a transform that fails returns an error item, and the
//! driver stops at the first one and hands it to the error translation chain.
//!
//! ```rust,ignore
//! let hide_prices = middleware(|ctx| Box::pin(async move {
//!     ctx.outgoing.map(|mut envelope| {
//!         if let Some(doc) = envelope.doc.as_mut().and_then(Value::as_object_mut) {
//!             doc.remove("price");
//!         }
//!         Ok(envelope)
//!     });
//!     Ok(())
//! }));
//! ```

use futures::future::{self, BoxFuture};
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::errors::ApiError;
use crate::model::Document;

/// One item flowing through a pipeline
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Envelope {
    /// Raw payload from the request body, if any
    pub incoming: Option<Value>,
    /// Document built from or read back from the model, if any
    pub doc: Option<Document>,
}

impl Envelope {
    #[must_use]
    pub fn incoming(value: Value) -> Self {
        Self {
            incoming: Some(value),
            doc: None,
        }
    }

    #[must_use]
    pub fn document(doc: Document) -> Self {
        Self {
            incoming: None,
            doc: Some(doc),
        }
    }
}

/// A fallible stream of envelopes
pub type ItemStream = BoxStream<'static, Result<Envelope, ApiError>>;

/// Turn a list of values into a stream
#[must_use]
pub fn from_values<F>(values: Vec<Value>, wrap: F) -> ItemStream
where
    F: Fn(Value) -> Envelope + Send + 'static,
{
    stream::iter(values.into_iter().map(move |v| Ok(wrap(v)))).boxed()
}

/// One stage of a pipeline
pub trait Transform: Send + Sync {
    fn transform(&self, items: ItemStream) -> ItemStream;
}

impl<F> Transform for F
where
    F: Fn(ItemStream) -> ItemStream + Send + Sync,
{
    fn transform(&self, items: ItemStream) -> ItemStream {
        self(items)
    }
}

/// Ordered transforms applied to a stream of envelopes
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Transform>>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline").field("stages", &self.stages.len()).finish()
    }
}

impl Pipeline {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Append an arbitrary stream transform
    pub fn transform(&mut self, stage: impl Transform + 'static) -> &mut Self {
        self.stages.push(Arc::new(stage));
        self
    }

    /// Append a synchronous per-item map
    pub fn map<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(Envelope) -> Result<Envelope, ApiError> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.transform(move |items: ItemStream| -> ItemStream {
            let f = Arc::clone(&f);
            items.map(move |item| item.and_then(|envelope| f(envelope))).boxed()
        })
    }

    /// Keep only the items for which `predicate` holds
    pub fn filter<F>(&mut self, predicate: F) -> &mut Self
    where
        F: Fn(&Envelope) -> bool + Send + Sync + 'static,
    {
        let predicate = Arc::new(predicate);
        self.transform(move |items: ItemStream| -> ItemStream {
            let predicate = Arc::clone(&predicate);
            items
                .try_filter(move |envelope| future::ready(predicate(envelope)))
                .boxed()
        })
    }

    /// Append an asynchronous per-item step
    pub fn then<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(Envelope) -> BoxFuture<'static, Result<Envelope, ApiError>> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.transform(move |items: ItemStream| -> ItemStream {
            let f = Arc::clone(&f);
            items.and_then(move |envelope| f(envelope)).boxed()
        })
    }

    /// Run `source` through every stage in registration order
    #[must_use]
    pub fn apply(&self, source: ItemStream) -> ItemStream {
        self.stages
            .iter()
            .fold(source, |items, stage| stage.transform(items))
    }
}
