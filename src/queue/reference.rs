//! Serializable references to callable targets.
//!
//! Closures cannot cross a queue boundary, so a deferred refresh carries a
//! [`ReferenceDescriptor`] instead: a type or method name plus positional JSON
//! arguments. The worker resolves it against a [`ReferenceRegistry`], an
//! explicitly built table of constructors and methods, to rebuild the call.
//!
//! A descriptor comes in three flavours:
//!
//! - bare type name (`args` is `None`): [`as_object`](ReferenceDescriptor::as_object)
//!   returns the name itself, used as the context of static methods
//! - construction (`Name` with `args`, or a `Spec`): the registered
//!   constructor is called once and the instance memoized
//! - method (`Name` with `args`): [`invoke_as_method`](ReferenceDescriptor::invoke_as_method)
//!   calls it against a resolved context

use crate::error::{Error, Result};
use futures::future::{BoxFuture, FutureExt};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Type-erased shared object.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// A positional argument.
///
/// `Live` arguments only exist in process; they are never serialized.
#[derive(Clone)]
pub enum Arg {
    Value(Value),
    Live(Instance),
}

impl Arg {
    pub fn live<T: Any + Send + Sync>(value: T) -> Self {
        Arg::Live(Arc::new(value))
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Arg::Value(v) => Some(v),
            Arg::Live(_) => None,
        }
    }

    /// Borrow a live argument as `T`.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        match self {
            Arg::Live(obj) => Arc::clone(obj).downcast::<T>().ok(),
            Arg::Value(_) => None,
        }
    }
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Value(v) => write!(f, "Value({})", v),
            Arg::Live(_) => f.write_str("Live(..)"),
        }
    }
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Arg::Value(value)
    }
}

/// What a descriptor points at.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reference {
    /// Type name or method name.
    Name(String),
    /// Construction spec: a registered type plus named properties.
    Spec {
        #[serde(rename = "type")]
        type_name: String,
        #[serde(default)]
        properties: Map<String, Value>,
    },
}

/// Result of [`ReferenceDescriptor::as_object`].
#[derive(Clone)]
pub enum Resolved {
    TypeName(String),
    Instance(Instance),
}

impl fmt::Debug for Resolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolved::TypeName(name) => write!(f, "TypeName({})", name),
            Resolved::Instance(_) => f.write_str("Instance(..)"),
        }
    }
}

/// Inputs handed to a registered constructor.
pub struct Construction<'a> {
    pub args: &'a [Arg],
    pub properties: &'a Map<String, Value>,
}

impl Construction<'_> {
    /// Positional JSON argument `index`, deserialized.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` when the argument is missing, live, or of
    /// the wrong shape.
    pub fn arg<T: serde::de::DeserializeOwned>(&self, index: usize) -> Result<T> {
        decode_arg(self.args, index)
    }
}

/// Deserialize positional JSON argument `index`.
///
/// # Errors
/// Returns `Error::ConfigError` when the argument is missing, live, or of the
/// wrong shape.
pub fn decode_arg<T: serde::de::DeserializeOwned>(args: &[Arg], index: usize) -> Result<T> {
    let value = args
        .get(index)
        .and_then(Arg::as_value)
        .ok_or_else(|| Error::ConfigError(format!("missing JSON argument #{}", index)))?;

    serde_json::from_value(value.clone())
        .map_err(|e| Error::ConfigError(format!("argument #{} has the wrong shape: {}", index, e)))
}

/// Serializable binding to a type, a constructed object or a method.
///
/// ```
/// use refresh_ahead_cache::queue::ReferenceDescriptor;
/// use serde_json::json;
///
/// let method = ReferenceDescriptor::method("load_product", vec![json!(42)])
///     .with_context(ReferenceDescriptor::construct("ProductRepository", vec![]));
///
/// let wire = serde_json::to_value(&method).unwrap();
/// assert_eq!(wire["reference"], json!("load_product"));
/// assert_eq!(wire["context"]["reference"], json!("ProductRepository"));
/// ```
#[derive(Clone, Serialize, Deserialize)]
pub struct ReferenceDescriptor {
    pub reference: Reference,

    /// Positional arguments. `None` marks a bare type name.
    #[serde(default)]
    pub args: Option<Vec<Value>>,

    /// Nested descriptor resolving the method context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Box<ReferenceDescriptor>>,

    #[serde(skip)]
    transient_args: Option<Vec<Arg>>,

    #[serde(skip)]
    context_object: Option<Instance>,

    #[serde(skip)]
    instance: OnceCell<Instance>,
}

impl ReferenceDescriptor {
    fn with_parts(reference: Reference, args: Option<Vec<Value>>) -> Self {
        ReferenceDescriptor {
            reference,
            args,
            context: None,
            transient_args: None,
            context_object: None,
            instance: OnceCell::new(),
        }
    }

    /// A bare type name, resolved to itself.
    pub fn type_name(name: impl Into<String>) -> Self {
        Self::with_parts(Reference::Name(name.into()), None)
    }

    /// Construct the named type with positional arguments.
    pub fn construct(type_name: impl Into<String>, args: Vec<Value>) -> Self {
        Self::with_parts(Reference::Name(type_name.into()), Some(args))
    }

    /// Construct the named type with properties.
    pub fn spec(type_name: impl Into<String>, properties: Map<String, Value>) -> Self {
        Self::with_parts(
            Reference::Spec {
                type_name: type_name.into(),
                properties,
            },
            Some(Vec::new()),
        )
    }

    /// Call the named method with positional arguments.
    pub fn method(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self::with_parts(Reference::Name(name.into()), Some(args))
    }

    /// Resolve the method context from a nested descriptor.
    pub fn with_context(mut self, context: ReferenceDescriptor) -> Self {
        self.context = Some(Box::new(context));
        self
    }

    /// Use a live object as method context. Takes precedence over
    /// [`with_context`](Self::with_context) and is not serialized.
    pub fn with_context_object(mut self, context: Instance) -> Self {
        self.context_object = Some(context);
        self
    }

    /// Arguments preferred over `args` at invocation time, never serialized.
    pub fn with_transient_args(mut self, args: Vec<Arg>) -> Self {
        self.transient_args = Some(args);
        self
    }

    /// Seed the memoized instance.
    pub fn with_instance(self, instance: Instance) -> Self {
        let _ = self.instance.set(instance);
        self
    }

    /// Whether the descriptor can be called: it has a sequence of arguments.
    pub fn has_arguments(&self) -> bool {
        self.transient_args.is_some() || self.args.is_some()
    }

    /// Name of the referenced type or method, if any.
    pub fn name(&self) -> Option<&str> {
        match &self.reference {
            Reference::Name(name) => Some(name),
            Reference::Spec { .. } => None,
        }
    }

    fn effective_args(&self) -> Vec<Arg> {
        match (&self.transient_args, &self.args) {
            (Some(transient), _) => transient.clone(),
            (None, Some(args)) => args.iter().cloned().map(Arg::Value).collect(),
            (None, None) => Vec::new(),
        }
    }

    /// Resolve the descriptor to a type name or an instance.
    ///
    /// Constructed instances are memoized: later calls return the same object.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` when a bare reference is not a valid type
    /// identifier or the registry has no constructor for the type.
    pub fn as_object(&self, registry: &ReferenceRegistry) -> Result<Resolved> {
        if let Some(instance) = self.instance.get() {
            return Ok(Resolved::Instance(Arc::clone(instance)));
        }

        let empty = Map::new();
        let (type_name, properties) = match &self.reference {
            Reference::Name(name) if !self.has_arguments() => {
                if !is_type_identifier(name) {
                    return Err(Error::ConfigError(format!(
                        "{:?} is not a valid type name",
                        name
                    )));
                }
                return Ok(Resolved::TypeName(name.clone()));
            }
            Reference::Name(name) => (name.as_str(), &empty),
            Reference::Spec {
                type_name,
                properties,
            } => (type_name.as_str(), properties),
        };

        let args = self.effective_args();
        let instance = self.instance.get_or_try_init(|| {
            registry.construct(
                type_name,
                Construction {
                    args: &args,
                    properties,
                },
            )
        })?;

        Ok(Resolved::Instance(Arc::clone(instance)))
    }

    /// Call the referenced method.
    ///
    /// The context is the first available of: the live context object, the
    /// nested `context` descriptor, `fallback`. An instance context dispatches
    /// to a method registered for its type, a type-name context to a static
    /// method registered under that name.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` when the reference is not a name, there are
    /// no arguments, no context resolves, or the registry lacks the method.
    /// Errors raised by the method itself are returned as-is.
    pub async fn invoke_as_method(
        &self,
        registry: &ReferenceRegistry,
        fallback: Option<&ReferenceDescriptor>,
    ) -> Result<Value> {
        let method = self.name().ok_or_else(|| {
            Error::ConfigError(format!(
                "method reference must be a name, got {:?}",
                self.reference
            ))
        })?;

        if !self.has_arguments() {
            return Err(Error::ConfigError(format!(
                "arguments of method {:?} must be a sequence",
                method
            )));
        }

        let context = if let Some(obj) = &self.context_object {
            Resolved::Instance(Arc::clone(obj))
        } else if let Some(nested) = &self.context {
            nested.as_object(registry)?
        } else if let Some(fallback) = fallback {
            fallback.as_object(registry)?
        } else {
            return Err(Error::ConfigError(format!(
                "no context to invoke method {:?} on",
                method
            )));
        };

        let args = self.effective_args();
        match context {
            Resolved::Instance(obj) => registry.call_method(obj, method, args).await,
            Resolved::TypeName(type_name) => registry.call_static(&type_name, method, args).await,
        }
    }
}

impl fmt::Debug for ReferenceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceDescriptor")
            .field("reference", &self.reference)
            .field("args", &self.args)
            .field("context", &self.context)
            .field("transient_args", &self.transient_args)
            .field("resolved", &self.instance.get().is_some())
            .finish()
    }
}

impl PartialEq for ReferenceDescriptor {
    /// Compares the serialized form only.
    fn eq(&self, other: &Self) -> bool {
        self.reference == other.reference && self.args == other.args && self.context == other.context
    }
}

fn is_type_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | ':' | '.' | '\\'))
}

type Constructor = Arc<dyn Fn(Construction<'_>) -> Result<Instance> + Send + Sync>;
type Method = Arc<dyn Fn(Instance, Vec<Arg>) -> BoxFuture<'static, Result<Value>> + Send + Sync>;
type StaticMethod = Arc<dyn Fn(Vec<Arg>) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Named constructors and methods that descriptors resolve against.
///
/// Build it once at startup and share it (`Arc`) between the process that
/// enqueues refresh jobs and the workers that run them.
///
/// ```
/// use refresh_ahead_cache::queue::{decode_arg, ReferenceRegistry};
/// use serde_json::json;
///
/// struct Prices { markup: f64 }
///
/// let registry = ReferenceRegistry::new()
///     .register_type("Prices", |c| Ok(Prices { markup: c.arg(0)? }))
///     .register_method("quote", |prices: std::sync::Arc<Prices>, args| async move {
///         let base: f64 = decode_arg(&args, 0)?;
///         Ok(json!(base * prices.markup))
///     });
/// assert!(registry.has_method("quote"));
/// ```
#[derive(Clone, Default)]
pub struct ReferenceRegistry {
    constructors: HashMap<String, Constructor>,
    methods: HashMap<(TypeId, String), Method>,
    statics: HashMap<(String, String), StaticMethod>,
}

impl ReferenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor for `type_name`.
    pub fn register_type<T, F>(mut self, type_name: impl Into<String>, ctor: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(Construction<'_>) -> Result<T> + Send + Sync + 'static,
    {
        let ctor: Constructor = Arc::new(move |construction: Construction<'_>| {
            let instance: Instance = Arc::new(ctor(construction)?);
            Ok(instance)
        });
        self.constructors.insert(type_name.into(), ctor);
        self
    }

    /// Register method `name` on instances of `T`.
    pub fn register_method<T, F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(Arc<T>, Vec<Arg>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let name = name.into();
        let method_name = name.clone();
        let method: Method = Arc::new(move |obj: Instance, args| match obj.downcast::<T>() {
            Ok(target) => f(target, args).boxed(),
            Err(_) => {
                let message = format!("context of {:?} has an unexpected type", method_name);
                async move { Err(Error::ConfigError(message)) }.boxed()
            }
        });
        self.methods.insert((TypeId::of::<T>(), name), method);
        self
    }

    /// Register static method `name` under `type_name`.
    pub fn register_static<F, Fut>(
        mut self,
        type_name: impl Into<String>,
        name: impl Into<String>,
        f: F,
    ) -> Self
    where
        F: Fn(Vec<Arg>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let method: StaticMethod = Arc::new(move |args| f(args).boxed());
        self.statics.insert((type_name.into(), name.into()), method);
        self
    }

    pub fn has_type(&self, type_name: &str) -> bool {
        self.constructors.contains_key(type_name)
    }

    /// Whether any type registers a method (instance or static) named `name`.
    pub fn has_method(&self, name: &str) -> bool {
        self.methods.keys().any(|(_, m)| m == name) || self.statics.keys().any(|(_, m)| m == name)
    }

    fn construct(&self, type_name: &str, construction: Construction<'_>) -> Result<Instance> {
        let ctor = self
            .constructors
            .get(type_name)
            .ok_or_else(|| Error::ConfigError(format!("unknown type {:?}", type_name)))?;
        debug!("✓ Constructing {} from reference", type_name);
        ctor(construction)
    }

    async fn call_method(&self, obj: Instance, name: &str, args: Vec<Arg>) -> Result<Value> {
        let type_id = Any::type_id(&*obj);
        let method = self
            .methods
            .get(&(type_id, name.to_string()))
            .ok_or_else(|| Error::ConfigError(format!("unknown method {:?} for context", name)))?;
        method(obj, args).await
    }

    async fn call_static(&self, type_name: &str, name: &str, args: Vec<Arg>) -> Result<Value> {
        let method = self
            .statics
            .get(&(type_name.to_string(), name.to_string()))
            .ok_or_else(|| {
                Error::ConfigError(format!("unknown static method {}::{}", type_name, name))
            })?;
        method(args).await
    }
}
