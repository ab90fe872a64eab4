use crate::ast::{Node, NodeKind};
use crate::env::Environment;
use crate::interpreter::Interpreter;
use crate::signal::Interrupt;
use crate::vars::list_el;
use std::sync::Arc;
use tracing::{debug, error};

impl Interpreter {
    /// Expand a names list into the argument list it denotes.
    ///
    /// Nested names lists are flattened in order.
    pub fn expand(&self, node: &Arc<Node>, x: &mut Environment) -> Result<Vec<String>, Interrupt> {
        if node.kind != NodeKind::Names {
            return Err(malformed(node, "names"));
        }
        let mut words = Vec::new();
        for c in &node.children {
            if c.kind == NodeKind::Names {
                words.extend(self.expand(c, x)?);
            } else {
                words.extend(self.expand1(c, x)?);
            }
        }
        debug!(?words, "expand");
        Ok(words)
    }

    /// Expand a single leaf node.
    pub fn expand1(&self, node: &Arc<Node>, x: &mut Environment) -> Result<Vec<String>, Interrupt> {
        match node.kind {
            NodeKind::Name => Ok(node.args.clone()),
            NodeKind::Names => self.expand(node, x),
            NodeKind::App => self.app_names(node, x),
            NodeKind::Len => self.var_len(node, x),
            NodeKind::Val | NodeKind::Single => self.var_value(node, x),
            NodeKind::IoBlk => self.expand_io(node, x),
            _ => Err(malformed(node, "leaf")),
        }
    }

    fn app_names(&self, node: &Arc<Node>, x: &mut Environment) -> Result<Vec<String>, Interrupt> {
        let [left, right] = node.children.as_slice() else {
            return Err(malformed(node, "app"));
        };
        let left = self.expand1(left, x)?;
        let right = self.expand1(right, x)?;
        Ok(match (left.len(), right.len()) {
            (0, _) => right,
            (_, 0) => left,
            (1, _) => right.iter().map(|r| format!("{}{r}", left[0])).collect(),
            (_, 1) => left.iter().map(|l| format!("{l}{}", right[0])).collect(),
            (n, m) if n == m => left
                .iter()
                .zip(&right)
                .map(|(l, r)| format!("{l}{r}"))
                .collect(),
            _ => {
                self.warn(x, format_args!("expand: different list lengths"));
                Vec::new()
            }
        })
    }

    fn var_len(&self, node: &Arc<Node>, x: &mut Environment) -> Result<Vec<String>, Interrupt> {
        let [name] = node.args.as_slice() else {
            return Err(malformed(node, "len"));
        };
        let n = x.ctx().var(name).map_or(0, |v| v.len());
        Ok(vec![n.to_string()])
    }

    fn var_value(&self, node: &Arc<Node>, x: &mut Environment) -> Result<Vec<String>, Interrupt> {
        let [name] = node.args.as_slice() else {
            return Err(malformed(node, "val"));
        };
        let words = match node.children.as_slice() {
            [] => x.ctx().var(name).map(|v| v.words()).unwrap_or_default(),
            [index] => {
                let idx = self.expand1(index, x)?;
                let [idx] = idx.as_slice() else {
                    self.warn(x, format_args!("${name}: index must be a single name"));
                    return Ok(Vec::new());
                };
                let ctx = x.ctx();
                if ctx.is_map(name) {
                    ctx.map(name).remove(idx).unwrap_or_default()
                } else {
                    let el = list_el(&ctx.list(name), idx);
                    if el.is_empty() { Vec::new() } else { vec![el] }
                }
            }
            _ => return Err(malformed(node, "val")),
        };
        if node.kind == NodeKind::Single {
            return Ok(vec![words.join(" ")]);
        }
        Ok(words)
    }
}

/// Report a node whose shape breaks the syntax-tree contract.
pub(crate) fn malformed(node: &Node, what: &str) -> Interrupt {
    error!(%node, "malformed {what} node");
    Interrupt::Exit(format!("malformed {what} node"))
}
