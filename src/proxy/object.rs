use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;

use super::codegen::{install_statement, ProxyWriter};
use super::{alias_for, validate_exposed_name, validate_identifier, ScriptObject, Signature};
use crate::error::{BridgeError, Result};
use crate::marshal::{script_literal, ArgReader, IntoWire, WireType};

/// A typed native closure callable with string arguments.
///
/// Implemented for `Fn(A, B, ..) -> R` of up to six arguments where every
/// argument is a `WireType` and `R` is `IntoWire`.
pub trait NativeFn<Args>: Send + Sync + 'static {
    fn signature() -> Signature;
    fn call(&self, args: &mut ArgReader<'_>) -> Result<String>;
}

macro_rules! impl_native_fn {
    ($($ty:ident $var:ident),*) => {
        impl<F, R, $($ty,)*> NativeFn<($($ty,)*)> for F
        where
            F: Fn($($ty),*) -> R + Send + Sync + 'static,
            R: IntoWire,
            $($ty: WireType,)*
        {
            fn signature() -> Signature {
                Signature {
                    params: vec![$(<$ty as WireType>::kind()),*],
                    ret: R::kind(),
                }
            }

            #[allow(unused_variables)]
            fn call(&self, args: &mut ArgReader<'_>) -> Result<String> {
                $(let $var = args.next::<$ty>()?;)*
                (self)($($var),*).into_wire()
            }
        }
    };
}

impl_native_fn!();
impl_native_fn!(A a);
impl_native_fn!(A a, B b);
impl_native_fn!(A a, B b, C c);
impl_native_fn!(A a, B b, C c, D d);
impl_native_fn!(A a, B b, C c, D d, E e);
impl_native_fn!(A a, B b, C c, D d, E e, G g);

pub(super) trait Invoke: Send + Sync {
    fn invoke(&self, args: &mut ArgReader<'_>) -> Result<String>;
}

pub(super) struct TypedFunction<F, Args> {
    func: F,
    _args: PhantomData<fn() -> Args>,
}

impl<F, Args> TypedFunction<F, Args> {
    pub(super) fn new(func: F) -> Self {
        Self {
            func,
            _args: PhantomData,
        }
    }
}

impl<F, Args> Invoke for TypedFunction<F, Args>
where
    F: NativeFn<Args>,
{
    fn invoke(&self, args: &mut ArgReader<'_>) -> Result<String> {
        self.func.call(args)
    }
}

struct Operation {
    signature: Signature,
    invoker: Arc<dyn Invoke>,
}

/// A standalone native object with its own dispatch table.
///
/// ```ignore
/// let console = NativeObject::new("console")?
///     .function("log", |text: String| tracing::info!("{text}"));
/// ```
pub struct NativeObject {
    exposed_name: String,
    alias: String,
    operations: BTreeMap<String, Operation>,
    order: Vec<String>,
    constants: Vec<(String, String)>,
    invalid: Option<BridgeError>,
}

impl NativeObject {
    pub fn new(exposed_name: &str) -> Result<Self> {
        validate_exposed_name(exposed_name)?;
        Ok(Self {
            exposed_name: exposed_name.to_string(),
            alias: alias_for(exposed_name),
            operations: BTreeMap::new(),
            order: Vec::new(),
            constants: Vec::new(),
            invalid: None,
        })
    }

    /// Register `func` as operation `name`. A later registration under the
    /// same name replaces the earlier one.
    ///
    /// An invalid name is remembered and reported when the object is
    /// registered with a window.
    pub fn function<Args, F>(mut self, name: &str, func: F) -> Self
    where
        Args: 'static,
        F: NativeFn<Args>,
    {
        if !self.accept_name(name) {
            return self;
        }
        let operation = Operation {
            signature: F::signature(),
            invoker: Arc::new(TypedFunction::new(func)),
        };
        if self.operations.insert(name.to_string(), operation).is_none() {
            self.order.push(name.to_string());
        }
        self
    }

    /// A read-only value baked into the proxy source.
    pub fn constant<V: WireType>(mut self, name: &str, value: &V) -> Self {
        if self.accept_name(name) {
            self.constants.push((name.to_string(), script_literal(value)));
        }
        self
    }

    fn accept_name(&mut self, name: &str) -> bool {
        match validate_identifier(name) {
            Ok(()) => true,
            Err(err) => {
                self.invalid.get_or_insert(err);
                false
            }
        }
    }

    pub fn signature(&self, operation: &str) -> Option<&Signature> {
        self.operations.get(operation).map(|op| &op.signature)
    }
}

impl ScriptObject for NativeObject {
    fn exposed_name(&self) -> &str {
        &self.exposed_name
    }

    fn alias(&self) -> &str {
        &self.alias
    }

    fn invoke(&self, operation: &str, args: &[String]) -> Result<String> {
        let op = self
            .operations
            .get(operation)
            .ok_or_else(|| BridgeError::UnknownOperation {
                object: self.exposed_name.clone(),
                operation: operation.to_string(),
            })?;
        let mut reader = ArgReader::new(operation, args);
        op.invoker.invoke(&mut reader)
    }

    fn proxy_source(&self) -> String {
        let mut writer = ProxyWriter::anonymous();
        for (name, literal) in &self.constants {
            writer.constant(name, literal);
        }
        for name in &self.order {
            if let Some(op) = self.operations.get(name) {
                writer.method(name, &op.signature);
            }
        }
        install_statement(&self.exposed_name, &writer.finish(), &self.alias)
    }

    fn operations(&self) -> Vec<String> {
        self.order.clone()
    }

    fn check(&self) -> Result<()> {
        match &self.invalid {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for NativeObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeObject")
            .field("exposed_name", &self.exposed_name)
            .field("alias", &self.alias)
            .field("operations", &self.order)
            .finish()
    }
}
