use std::collections::BTreeMap;
use std::fmt;

use anyhow::{anyhow, Context, Result};

use crate::ops::conv_2d::register_conv_2d;
use crate::ops::elementwise::{register_add, register_logistic, register_mul, register_relu};
use crate::ops::softmax::register_softmax;
use crate::ops::transpose_conv_bias::{
    register_convolution_2d_transpose_bias, CONVOLUTION_2D_TRANSPOSE_BIAS,
};
use crate::ops::{KernelFactory, OpKernel};

pub const BUILTIN_OPS: &[&str] = &["ADD", "MUL", "RELU", "LOGISTIC", "SOFTMAX", "CONV_2D"];

/// Operator name to kernel factory mapping consulted when an interpreter is
/// built. Contents are fixed once the registry is handed to a session.
#[derive(Clone, Default)]
pub struct OpRegistry {
    builtins: BTreeMap<String, KernelFactory>,
    custom: BTreeMap<String, KernelFactory>,
}

impl fmt::Debug for OpRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpRegistry")
            .field("builtins", &self.builtins.keys().collect::<Vec<_>>())
            .field("custom", &self.custom.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl OpRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        let factories = [
            register_add(),
            register_mul(),
            register_relu(),
            register_logistic(),
            register_softmax(),
            register_conv_2d(),
        ];
        for (name, factory) in BUILTIN_OPS.iter().zip(factories) {
            registry.builtins.insert((*name).to_string(), factory);
        }
        registry
    }

    /// Bind `name` to an externally supplied kernel. Names already taken by a
    /// builtin or an earlier custom registration are rejected.
    pub fn add_custom(&mut self, name: &str, factory: KernelFactory) -> Result<()> {
        if self.contains(name) {
            return Err(anyhow!("operator {} is already registered", name));
        }
        self.custom.insert(name.to_string(), factory);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.builtins.contains_key(name) || self.custom.contains_key(name)
    }

    pub fn is_custom(&self, name: &str) -> bool {
        self.custom.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.builtins
            .keys()
            .chain(self.custom.keys())
            .map(String::as_str)
            .collect()
    }

    pub fn custom_names(&self) -> Vec<&str> {
        self.custom.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.builtins.len() + self.custom.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Instantiate the kernel for one graph node.
    pub fn resolve(&self, name: &str, params: &[i32]) -> Result<Box<dyn OpKernel>> {
        let factory = self
            .builtins
            .get(name)
            .or_else(|| self.custom.get(name))
            .ok_or_else(|| anyhow!("operator {} is not registered", name))?;
        factory(params).with_context(|| format!("configure operator {}", name))
    }
}

/// The builtin set plus the `Convolution2DTransposeBias` custom operator.
pub fn build_registry() -> Result<OpRegistry> {
    let mut registry = OpRegistry::builtin();
    registry
        .add_custom(
            CONVOLUTION_2D_TRANSPOSE_BIAS,
            register_convolution_2d_transpose_bias(),
        )
        .context("register custom operators")?;
    Ok(registry)
}
