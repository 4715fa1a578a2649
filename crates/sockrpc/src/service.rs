//! Registration-time method tables for locally served objects.
//!
//! Instead of runtime reflection, a service registers each callable method
//! once as a typed async closure. The resulting table is built a single time
//! per service type and cached process-wide, mirroring how the per-type
//! registries of classic RPC stacks are cached across instances.

use crate::error::{Result, RpcError};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, OnceLock};

/// A locally served object whose methods can be invoked by the peer.
pub trait RpcService: Send + Sync + 'static {
    /// Interface name accepted as an `Interface.Method` qualifier prefix.
    const NAME: &'static str;

    /// Register every callable method into the table.
    fn register(methods: &mut MethodTableBuilder<Self>)
    where
        Self: Sized;
}

pub(crate) type InvokeFn<S> =
    Box<dyn Fn(Arc<S>, Vec<Value>) -> BoxFuture<'static, Result<Option<Value>>> + Send + Sync>;

struct MethodEntry<S> {
    arity: usize,
    invoke: InvokeFn<S>,
}

/// Immutable per-type method table.
pub struct MethodTable<S> {
    methods: HashMap<&'static str, MethodEntry<S>>,
}

impl<S: RpcService> MethodTable<S> {
    /// Build (or fetch the cached) table for `S`.
    ///
    /// Configuration errors (duplicate method names) surface here, before
    /// any connection traffic.
    pub fn for_service() -> Result<Arc<MethodTable<S>>> {
        static CACHE: OnceLock<Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>> =
            OnceLock::new();
        let cache = CACHE.get_or_init(|| Mutex::new(HashMap::new()));

        {
            let cache = cache.lock().expect("method table cache lock poisoned");
            if let Some(table) = cache.get(&TypeId::of::<S>()) {
                let table = Arc::clone(table)
                    .downcast::<MethodTable<S>>()
                    .expect("method table cache holds the wrong type");
                return Ok(table);
            }
        }

        let mut builder = MethodTableBuilder::new();
        S::register(&mut builder);
        let table = Arc::new(builder.build()?);

        cache
            .lock()
            .expect("method table cache lock poisoned")
            .insert(TypeId::of::<S>(), Arc::clone(&table) as Arc<dyn Any + Send + Sync>);
        Ok(table)
    }

    pub(crate) fn get(&self, name: &str) -> Option<(usize, &InvokeFn<S>)> {
        self.methods.get(name).map(|entry| (entry.arity, &entry.invoke))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }
}

/// Collects method registrations and rejects duplicates at build time.
pub struct MethodTableBuilder<S> {
    methods: HashMap<&'static str, MethodEntry<S>>,
    duplicates: Vec<&'static str>,
}

impl<S: RpcService> MethodTableBuilder<S> {
    fn new() -> Self {
        Self {
            methods: HashMap::new(),
            duplicates: Vec::new(),
        }
    }

    /// Register a value-returning method.
    pub fn method<A, R, F, Fut>(&mut self, name: &'static str, f: F) -> &mut Self
    where
        A: FromArgs,
        R: Serialize + Send + 'static,
        F: Fn(Arc<S>, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let f = Arc::new(f);
        self.insert(
            name,
            A::ARITY,
            Box::new(move |service, args| {
                let f = Arc::clone(&f);
                Box::pin(async move {
                    let typed = A::from_args(name, args)?;
                    let value = f(service, typed).await?;
                    Ok(Some(serde_json::to_value(value)?))
                })
            }),
        )
    }

    /// Register a method with no meaningful return value. Its response
    /// carries the boolean `true` completion sentinel.
    pub fn one_way<A, F, Fut>(&mut self, name: &'static str, f: F) -> &mut Self
    where
        A: FromArgs,
        F: Fn(Arc<S>, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let f = Arc::new(f);
        self.insert(
            name,
            A::ARITY,
            Box::new(move |service, args| {
                let f = Arc::clone(&f);
                Box::pin(async move {
                    let typed = A::from_args(name, args)?;
                    f(service, typed).await?;
                    Ok(None)
                })
            }),
        )
    }

    fn insert(&mut self, name: &'static str, arity: usize, invoke: InvokeFn<S>) -> &mut Self {
        if self
            .methods
            .insert(name, MethodEntry { arity, invoke })
            .is_some()
        {
            self.duplicates.push(name);
        }
        self
    }

    fn build(self) -> Result<MethodTable<S>> {
        if !self.duplicates.is_empty() {
            return Err(RpcError::config(format!(
                "Overloaded functions are not supported: {}",
                self.duplicates.join(", ")
            )));
        }
        Ok(MethodTable {
            methods: self.methods,
        })
    }
}

/// Decodes an ordered argument list into a typed tuple.
pub trait FromArgs: Send + Sized + 'static {
    const ARITY: usize;

    fn from_args(method: &str, args: Vec<Value>) -> Result<Self>;
}

fn convert<T: DeserializeOwned>(method: &str, index: usize, value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| RpcError::ArgumentConversion {
        name: method.to_string(),
        index,
        message: e.to_string(),
    })
}

fn check_arity(method: &str, expected: usize, args: &[Value]) -> Result<()> {
    if args.len() != expected {
        return Err(RpcError::ArityMismatch {
            name: method.to_string(),
            expected,
            actual: args.len(),
        });
    }
    Ok(())
}

impl FromArgs for () {
    const ARITY: usize = 0;

    fn from_args(method: &str, args: Vec<Value>) -> Result<Self> {
        check_arity(method, 0, &args)
    }
}

macro_rules! impl_from_args {
    ($count:literal; $($ty:ident => $idx:tt),+) => {
        impl<$($ty),+> FromArgs for ($($ty,)+)
        where
            $($ty: DeserializeOwned + Send + 'static,)+
        {
            const ARITY: usize = $count;

            fn from_args(method: &str, args: Vec<Value>) -> Result<Self> {
                check_arity(method, $count, &args)?;
                let mut iter = args.into_iter();
                Ok(($(
                    convert::<$ty>(method, $idx, iter.next().expect("arity checked"))?,
                )+))
            }
        }
    };
}

impl_from_args!(1; A0 => 0);
impl_from_args!(2; A0 => 0, A1 => 1);
impl_from_args!(3; A0 => 0, A1 => 1, A2 => 2);
impl_from_args!(4; A0 => 0, A1 => 1, A2 => 2, A3 => 3);
impl_from_args!(5; A0 => 0, A1 => 1, A2 => 2, A3 => 3, A4 => 4);
