use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, PoisonError};

use super::codegen::{constructor_name, install_statement, ProxyWriter};
use super::object::TypedFunction;
use super::{alias_for, validate_exposed_name, validate_identifier, NativeFn, ScriptObject, Signature};
use crate::error::{BridgeError, Result};
use crate::marshal::{ArgReader, IntoWire, WireKind, WireType};

/// A typed closure over `&mut T` callable with string arguments.
pub trait NativeMethod<T, Args>: Send + Sync + 'static {
    fn signature() -> Signature;
    fn call(&self, target: &mut T, args: &mut ArgReader<'_>) -> Result<String>;
}

macro_rules! impl_native_method {
    ($($ty:ident $var:ident),*) => {
        impl<T, F, R, $($ty,)*> NativeMethod<T, ($($ty,)*)> for F
        where
            F: Fn(&mut T, $($ty),*) -> R + Send + Sync + 'static,
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
            fn call(&self, target: &mut T, args: &mut ArgReader<'_>) -> Result<String> {
                $(let $var = args.next::<$ty>()?;)*
                (self)(target, $($var),*).into_wire()
            }
        }
    };
}

impl_native_method!();
impl_native_method!(A a);
impl_native_method!(A a, B b);
impl_native_method!(A a, B b, C c);
impl_native_method!(A a, B b, C c, D d);
impl_native_method!(A a, B b, C c, D d, E e);

trait ClassCall<T>: Send + Sync {
    fn call(&self, target: &mut T, args: &mut ArgReader<'_>) -> Result<String>;
}

struct TypedMethod<F, Args> {
    func: F,
    _args: PhantomData<fn() -> Args>,
}

impl<T, F, Args> ClassCall<T> for TypedMethod<F, Args>
where
    F: NativeMethod<T, Args>,
{
    fn call(&self, target: &mut T, args: &mut ArgReader<'_>) -> Result<String> {
        self.func.call(target, args)
    }
}

impl<T, F, Args> ClassCall<T> for TypedFunction<F, Args>
where
    F: NativeFn<Args>,
{
    fn call(&self, _target: &mut T, args: &mut ArgReader<'_>) -> Result<String> {
        super::object::Invoke::invoke(self, args)
    }
}

struct PropertyGetter<G, V> {
    getter: G,
    _value: PhantomData<fn() -> V>,
}

impl<T, G, V> ClassCall<T> for PropertyGetter<G, V>
where
    G: Fn(&T) -> V + Send + Sync,
    V: WireType,
{
    fn call(&self, target: &mut T, _args: &mut ArgReader<'_>) -> Result<String> {
        Ok((self.getter)(&*target).encode())
    }
}

struct PropertySetter<S, V> {
    setter: S,
    _value: PhantomData<fn() -> V>,
}

impl<T, S, V> ClassCall<T> for PropertySetter<S, V>
where
    S: Fn(&mut T, V) + Send + Sync,
    V: WireType,
{
    fn call(&self, target: &mut T, args: &mut ArgReader<'_>) -> Result<String> {
        let value = args.next::<V>()?;
        (self.setter)(target, value);
        Ok(String::new())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDescriptor {
    pub name: String,
    pub kind: WireKind,
    pub writable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub name: String,
    pub signature: Signature,
}

/// Builds the dispatch table and proxy constructor for a native type.
///
/// Properties dispatch as `get_<name>`/`set_<name>` and appear to script as
/// ordinary fields. Call `end` to obtain the finished `ClassDescriptor`.
pub struct ClassBuilder<T> {
    name: String,
    writer: ProxyWriter,
    properties: Vec<PropertyDescriptor>,
    methods: Vec<MethodDescriptor>,
    dispatch: HashMap<String, Arc<dyn ClassCall<T>>>,
    invalid: Option<BridgeError>,
}

impl<T: 'static> ClassBuilder<T> {
    pub fn new(name: &str) -> Result<Self> {
        validate_identifier(name)?;
        Ok(Self {
            name: name.to_string(),
            writer: ProxyWriter::constructor(name),
            properties: Vec::new(),
            methods: Vec::new(),
            dispatch: HashMap::new(),
            invalid: None,
        })
    }

    pub fn property<V, G, S>(mut self, name: &str, getter: G, setter: S) -> Self
    where
        V: WireType + 'static,
        G: Fn(&T) -> V + Send + Sync + 'static,
        S: Fn(&mut T, V) + Send + Sync + 'static,
    {
        if !self.accept_name(name, &accessor_keys(name)) {
            return self;
        }
        self.insert_getter(name, getter);
        self.dispatch.insert(
            format!("set_{name}"),
            Arc::new(PropertySetter {
                setter,
                _value: PhantomData,
            }),
        );
        self.push_property(name, V::kind(), true);
        self
    }

    /// A property script can read but not assign.
    pub fn readonly<V, G>(mut self, name: &str, getter: G) -> Self
    where
        V: WireType + 'static,
        G: Fn(&T) -> V + Send + Sync + 'static,
    {
        if !self.accept_name(name, &accessor_keys(name)) {
            return self;
        }
        self.insert_getter(name, getter);
        self.push_property(name, V::kind(), false);
        self
    }

    pub fn method<Args, F>(mut self, name: &str, func: F) -> Self
    where
        Args: 'static,
        F: NativeMethod<T, Args>,
    {
        if !self.accept_name(name, &[name.to_string()]) {
            return self;
        }
        let signature = F::signature();
        self.dispatch.insert(
            name.to_string(),
            Arc::new(TypedMethod {
                func,
                _args: PhantomData,
            }),
        );
        self.push_method(name, signature);
        self
    }

    /// A member that does not touch the instance.
    pub fn function<Args, F>(mut self, name: &str, func: F) -> Self
    where
        Args: 'static,
        F: NativeFn<Args>,
    {
        if !self.accept_name(name, &[name.to_string()]) {
            return self;
        }
        let signature = F::signature();
        self.dispatch
            .insert(name.to_string(), Arc::new(TypedFunction::new(func)));
        self.push_method(name, signature);
        self
    }

    /// Close the constructor source and freeze the descriptor.
    pub fn end(self) -> Result<ClassDescriptor<T>> {
        if let Some(err) = self.invalid {
            return Err(err);
        }
        Ok(ClassDescriptor {
            name: self.name,
            source: self.writer.finish(),
            properties: self.properties,
            methods: self.methods,
            dispatch: self.dispatch,
        })
    }

    fn insert_getter<V, G>(&mut self, name: &str, getter: G)
    where
        V: WireType + 'static,
        G: Fn(&T) -> V + Send + Sync + 'static,
    {
        self.dispatch.insert(
            format!("get_{name}"),
            Arc::new(PropertyGetter {
                getter,
                _value: PhantomData,
            }),
        );
    }

    fn push_property(&mut self, name: &str, kind: WireKind, writable: bool) {
        self.writer.property(name, &kind, writable);
        self.properties.push(PropertyDescriptor {
            name: name.to_string(),
            kind,
            writable,
        });
    }

    fn push_method(&mut self, name: &str, signature: Signature) {
        self.writer.method(name, &signature);
        self.methods.push(MethodDescriptor {
            name: name.to_string(),
            signature,
        });
    }

    /// A member is accepted when neither its name nor any of the dispatch
    /// keys it occupies is already claimed. Properties claim both accessor
    /// keys, readonly ones included.
    fn accept_name(&mut self, name: &str, keys: &[String]) -> bool {
        let taken = self.properties.iter().any(|p| p.name == name)
            || self.methods.iter().any(|m| m.name == name)
            || keys.iter().any(|key| self.claims(key));
        let result = if taken {
            Err(BridgeError::DuplicateRegistration {
                name: format!("{}.{name}", self.name),
            })
        } else {
            validate_identifier(name)
        };
        match result {
            Ok(()) => true,
            Err(err) => {
                self.invalid.get_or_insert(err);
                false
            }
        }
    }

    fn claims(&self, key: &str) -> bool {
        self.dispatch.contains_key(key)
            || self
                .properties
                .iter()
                .any(|p| accessor_keys(&p.name).iter().any(|k| k == key))
    }
}

fn accessor_keys(name: &str) -> [String; 2] {
    [format!("get_{name}"), format!("set_{name}")]
}

/// Finished, immutable description of a native type exposed to script.
pub struct ClassDescriptor<T> {
    name: String,
    source: String,
    properties: Vec<PropertyDescriptor>,
    methods: Vec<MethodDescriptor>,
    dispatch: HashMap<String, Arc<dyn ClassCall<T>>>,
}

impl<T> ClassDescriptor<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn constructor_name(&self) -> String {
        constructor_name(&self.name)
    }

    /// Source of the `cls_<name>` constructor.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn properties(&self) -> &[PropertyDescriptor] {
        &self.properties
    }

    pub fn methods(&self) -> &[MethodDescriptor] {
        &self.methods
    }

    pub fn invoke(
        &self,
        object: &str,
        target: &mut T,
        operation: &str,
        args: &[String],
    ) -> Result<String> {
        let call = self
            .dispatch
            .get(operation)
            .ok_or_else(|| BridgeError::UnknownOperation {
                object: object.to_string(),
                operation: operation.to_string(),
            })?;
        let mut reader = ArgReader::new(operation, args);
        call.call(target, &mut reader)
    }

    fn operation_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.dispatch.keys().cloned().collect();
        names.sort();
        names
    }
}

impl<T: Send + 'static> ClassDescriptor<T> {
    /// Expose `instance` as `window.<exposed_name>`.
    ///
    /// The instance stays shared with native code; every property access
    /// from script reads the current value.
    pub fn bind(
        self: &Arc<Self>,
        exposed_name: &str,
        instance: Arc<Mutex<T>>,
    ) -> Result<BoundObject<T>> {
        validate_exposed_name(exposed_name)?;
        Ok(BoundObject {
            exposed_name: exposed_name.to_string(),
            alias: alias_for(exposed_name),
            descriptor: Arc::clone(self),
            instance,
        })
    }
}

impl<T> std::fmt::Debug for ClassDescriptor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassDescriptor")
            .field("name", &self.name)
            .field("properties", &self.properties)
            .field("methods", &self.methods)
            .finish()
    }
}

/// An instance of a described native type, exposed to script.
pub struct BoundObject<T> {
    exposed_name: String,
    alias: String,
    descriptor: Arc<ClassDescriptor<T>>,
    instance: Arc<Mutex<T>>,
}

impl<T> BoundObject<T> {
    pub fn descriptor(&self) -> &Arc<ClassDescriptor<T>> {
        &self.descriptor
    }

    pub fn instance(&self) -> &Arc<Mutex<T>> {
        &self.instance
    }
}

impl<T: Send + 'static> ScriptObject for BoundObject<T> {
    fn exposed_name(&self) -> &str {
        &self.exposed_name
    }

    fn alias(&self) -> &str {
        &self.alias
    }

    /// The instance lock is held for the duration of the call.
    fn invoke(&self, operation: &str, args: &[String]) -> Result<String> {
        let mut target = self.instance.lock().unwrap_or_else(PoisonError::into_inner);
        self.descriptor
            .invoke(&self.exposed_name, &mut target, operation, args)
    }

    fn proxy_source(&self) -> String {
        install_statement(
            &self.exposed_name,
            &self.descriptor.constructor_name(),
            &self.alias,
        )
    }

    fn operations(&self) -> Vec<String> {
        self.descriptor.operation_names()
    }
}
