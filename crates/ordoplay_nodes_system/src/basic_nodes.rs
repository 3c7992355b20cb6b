// SPDX-License-Identifier: MIT OR Apache-2.0
//! Basic node pack.
//!
//! Constants, integer and float arithmetic, a variadic sum, an output node
//! that captures what reaches it, the storage pair, node groups and int/float
//! conversions. Hosts extend the returned descriptor with their own types.

use ordoplay_nodes_core::{
    register_group_nodes, register_storage_nodes, AnyValue, ExeParams, NodeExecError, NodeTreeDescriptor, NodeTypeInfo, Result, Value,
};
use std::sync::Arc;

/// Integer constant
pub const INT_VALUE: &str = "int_value";
/// Float constant
pub const FLOAT_VALUE: &str = "float_value";
/// Integer addition
pub const ADD: &str = "add";
/// Integer subtraction
pub const SUB: &str = "sub";
/// Integer multiplication
pub const MUL: &str = "mul";
/// Float addition
pub const ADD_FLOAT: &str = "add_float";
/// Sum over a variadic input group
pub const SUM: &str = "sum";
/// Always-required sink that captures its input
pub const OUTPUT: &str = "output";

/// Identifier of the variadic group on [`SUM`]
pub const SUM_GROUP: &str = "values";

/// What an [`OUTPUT`] node received during the last execution
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapturedValue {
    /// The last captured value
    pub value: Option<Value>,
    /// How many times the node ran
    pub executions: usize,
}

/// Build a descriptor holding the basic node pack
pub fn create_basic_descriptor() -> Result<Arc<NodeTreeDescriptor>> {
    let mut descriptor = NodeTreeDescriptor::new();
    register_basic_nodes(&mut descriptor)?;
    Ok(Arc::new(descriptor))
}

/// Register the basic node pack into an existing descriptor
pub fn register_basic_nodes(descriptor: &mut NodeTreeDescriptor) -> Result<()> {
    descriptor
        .register_node(
            NodeTypeInfo::new(INT_VALUE)
                .with_ui_name("Int Value")
                .with_declare(|b| {
                    b.add_input::<i32>("value");
                    b.add_output::<i32>("value");
                })
                .with_execute(|p| {
                    let value: i32 = p.get_input("value")?;
                    p.set_output("value", value)
                }),
        )?
        .register_node(
            NodeTypeInfo::new(FLOAT_VALUE)
                .with_ui_name("Float Value")
                .with_declare(|b| {
                    b.add_input::<f32>("value");
                    b.add_output::<f32>("value");
                })
                .with_execute(|p| {
                    let value: f32 = p.get_input("value")?;
                    p.set_output("value", value)
                }),
        )?
        .register_node(binary_int(ADD, "Add", |a, b| Ok(a.wrapping_add(b))))?
        .register_node(binary_int(SUB, "Subtract", |a, b| Ok(a.wrapping_sub(b))))?
        .register_node(binary_int(MUL, "Multiply", |a, b| {
            a.checked_mul(b).ok_or_else(|| "Integer overflow".into())
        }))?
        .register_node(
            NodeTypeInfo::new(ADD_FLOAT)
                .with_ui_name("Add Float")
                .with_declare(|b| {
                    b.add_input::<f32>("a");
                    b.add_input::<f32>("b");
                    b.add_output::<f32>("value");
                })
                .with_execute(|p| {
                    let sum = p.get_input::<f32>("a")? + p.get_input::<f32>("b")?;
                    p.set_output("value", sum)
                }),
        )?
        .register_node(
            NodeTypeInfo::new(SUM)
                .with_ui_name("Sum")
                .with_declare(|b| {
                    b.add_input_group(SUM_GROUP);
                    b.add_output::<i32>("value");
                })
                .with_execute(execute_sum),
        )?
        .register_node(
            NodeTypeInfo::new(OUTPUT)
                .with_ui_name("Output")
                .always_required()
                .with_declare(|b| {
                    b.add_input::<AnyValue>("value");
                    b.storage::<CapturedValue>();
                })
                .with_execute(|p| {
                    let value = p.input_value("value")?.clone();
                    if let Some(captured) = p.storage::<CapturedValue>() {
                        captured.value = Some(value);
                        captured.executions += 1;
                    }
                    Ok(())
                }),
        )?
        .register_conversion::<i32, f32, _>(|from, to| {
            *to = *from as f32;
            true
        })?
        .register_conversion::<f32, i32, _>(|from, to| {
            if !from.is_finite() {
                return false;
            }
            *to = from.round() as i32;
            true
        })?;

    register_storage_nodes(descriptor)?;
    register_group_nodes(descriptor)?;
    tracing::debug!("Registered {} basic node types", descriptor.node_types().count());
    Ok(())
}

fn binary_int<F>(id_name: &str, ui_name: &str, op: F) -> NodeTypeInfo
where
    F: Fn(i32, i32) -> std::result::Result<i32, NodeExecError> + Send + Sync + 'static,
{
    NodeTypeInfo::new(id_name)
        .with_ui_name(ui_name)
        .with_declare(|b| {
            b.add_input::<i32>("a");
            b.add_input::<i32>("b");
            b.add_output::<i32>("value");
        })
        .with_execute(move |p| {
            let value = op(p.get_input("a")?, p.get_input("b")?)?;
            p.set_output("value", value)
        })
}

fn execute_sum(p: &mut ExeParams<'_>) -> std::result::Result<(), NodeExecError> {
    let identifiers: Vec<String> = p.input_identifiers().map(str::to_string).collect();
    let mut total = 0i32;
    for identifier in &identifiers {
        total = total.wrapping_add(p.get_input::<i32>(identifier)?);
    }
    p.set_output("value", total)
}
