use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Kind of a syntax node.
///
/// The parser is not part of this crate; it hands over trees built from
/// these nodes. Each kind expects a fixed shape of `args` and `children`,
/// checked by the evaluator when the node is run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// A pipeline. `args[0]` is the background marker: empty for a
    /// foreground pipeline, `&` for an anonymous job, anything else a tag.
    Pipe,
    /// A simple command; the single child is its `Names` node.
    Cmd,
    /// A sequence of pipelines and source-includes.
    Block,
    /// `for name values... { block }`
    For,
    /// `while pipe { block }`
    While,
    /// A list of `Or` clauses.
    Cond,
    /// One clause of a `Cond`.
    Or,
    /// `name = values` or `name[index] = values`
    Set,
    /// `name = ([key values...] ...)`
    SetMap,
    /// Source-include of another script.
    Src,
    /// Function definition.
    Func,
    /// Literal words.
    Name,
    /// Concatenation of two expansions.
    App,
    /// `$#name`
    Len,
    /// `$name` or `$name[index]`
    Val,
    /// `$^name` or `$^name[index]`: like `Val` but folded into one word.
    Single,
    /// List of expansions.
    Names,
    /// An io-block: `<{...}`, `<name:stream{...}` or `>stream:name{...}`.
    IoBlk,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeKind::Pipe => "pipe",
            NodeKind::Cmd => "cmd",
            NodeKind::Block => "block",
            NodeKind::For => "for",
            NodeKind::While => "while",
            NodeKind::Cond => "cond",
            NodeKind::Or => "or",
            NodeKind::Set => "set",
            NodeKind::SetMap => "setmap",
            NodeKind::Src => "source",
            NodeKind::Func => "func",
            NodeKind::Name => "name",
            NodeKind::App => "app",
            NodeKind::Len => "len",
            NodeKind::Val => "val",
            NodeKind::Single => "single",
            NodeKind::Names => "names",
            NodeKind::IoBlk => "ioblk",
        };
        f.write_str(s)
    }
}

/// How a file redirection opens its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileMode {
    Read,
    Truncate,
    Append,
}

/// A redirection attached to a pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Redirection {
    /// `<[stream] path`, `>[stream] path` or `>>[stream] path`.
    File {
        stream: String,
        mode: FileMode,
        path: Arc<Node>,
    },
    /// The stage's `from` stream feeds the next stage's `to` stream.
    Pipe { from: String, to: String },
    /// `stream` is bound to whatever `source` is bound to.
    Dup { stream: String, source: String },
}

/// A node of the syntax tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub kind: NodeKind,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub children: Vec<Arc<Node>>,
    #[serde(default)]
    pub redirs: Vec<Redirection>,
}

impl Node {
    pub fn new(kind: NodeKind, args: Vec<String>, children: Vec<Node>) -> Self {
        Self {
            kind,
            args,
            children: children.into_iter().map(Arc::new).collect(),
            redirs: Vec::new(),
        }
    }

    /// Attach a redirection, consuming and returning the node.
    pub fn redirect(mut self, redir: Redirection) -> Self {
        self.redirs.push(redir);
        self
    }

    /// Foreground pipeline.
    pub fn pipe(stages: Vec<Node>) -> Self {
        Self::new(NodeKind::Pipe, vec![String::new()], stages)
    }

    /// Background pipeline; `tag` is `&` for an anonymous job.
    pub fn bg_pipe(tag: &str, stages: Vec<Node>) -> Self {
        Self::new(NodeKind::Pipe, vec![tag.to_string()], stages)
    }

    /// Command whose words are given by `names`, a `Names` node.
    pub fn cmd(names: Node) -> Self {
        Self::new(NodeKind::Cmd, Vec::new(), vec![names])
    }

    /// Command made of literal words only.
    pub fn words(words: &[&str]) -> Self {
        Self::cmd(Self::names(words.iter().map(|w| Self::name(w)).collect()))
    }

    pub fn block(children: Vec<Node>) -> Self {
        Self::new(NodeKind::Block, Vec::new(), children)
    }

    pub fn for_loop(header: Node, body: Node) -> Self {
        Self::new(NodeKind::For, Vec::new(), vec![header, body])
    }

    pub fn while_loop(cond: Node, body: Node) -> Self {
        Self::new(NodeKind::While, Vec::new(), vec![cond, body])
    }

    pub fn cond(clauses: Vec<Node>) -> Self {
        Self::new(NodeKind::Cond, Vec::new(), clauses)
    }

    pub fn or(children: Vec<Node>) -> Self {
        Self::new(NodeKind::Or, Vec::new(), children)
    }

    pub fn set(name: &str, values: Node) -> Self {
        Self::new(NodeKind::Set, vec![name.to_string()], vec![values])
    }

    pub fn set_index(name: &str, index: Node, values: Node) -> Self {
        Self::new(NodeKind::Set, vec![name.to_string()], vec![index, values])
    }

    pub fn set_map(name: &str, entries: Vec<Node>) -> Self {
        Self::new(NodeKind::SetMap, vec![name.to_string()], entries)
    }

    pub fn source(file: Node) -> Self {
        Self::new(NodeKind::Src, Vec::new(), vec![file])
    }

    pub fn func(name: &str, body: Node) -> Self {
        Self::new(NodeKind::Func, vec![name.to_string()], vec![body])
    }

    pub fn name(word: &str) -> Self {
        Self::new(NodeKind::Name, vec![word.to_string()], Vec::new())
    }

    pub fn app(left: Node, right: Node) -> Self {
        Self::new(NodeKind::App, Vec::new(), vec![left, right])
    }

    pub fn length(var: &str) -> Self {
        Self::new(NodeKind::Len, vec![var.to_string()], Vec::new())
    }

    pub fn val(var: &str) -> Self {
        Self::new(NodeKind::Val, vec![var.to_string()], Vec::new())
    }

    pub fn val_index(var: &str, index: Node) -> Self {
        Self::new(NodeKind::Val, vec![var.to_string()], vec![index])
    }

    pub fn single(var: &str) -> Self {
        Self::new(NodeKind::Single, vec![var.to_string()], Vec::new())
    }

    pub fn names(children: Vec<Node>) -> Self {
        Self::new(NodeKind::Names, Vec::new(), children)
    }

    /// `<{ block }`
    pub fn io_capture(children: Vec<Node>) -> Self {
        Self::new(NodeKind::IoBlk, vec![String::new()], children)
    }

    /// `<tag{ block }` or `>tag{ block }`; `dir` is `<` or `>`.
    pub fn io_bind(dir: &str, tag: &str, children: Vec<Node>) -> Self {
        Self::new(
            NodeKind::IoBlk,
            vec![dir.to_string(), tag.to_string()],
            children,
        )
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if !self.args.is_empty() {
            write!(f, "{:?}", self.args)?;
        }
        if !self.children.is_empty() {
            f.write_str("(")?;
            for (i, c) in self.children.iter().enumerate() {
                if i > 0 {
                    f.write_str(" ")?;
                }
                write!(f, "{c}")?;
            }
            f.write_str(")")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_builds_cmd_of_names() {
        let n = Node::words(&["echo", "hi"]);
        assert_eq!(n.kind, NodeKind::Cmd);
        assert_eq!(n.children.len(), 1);
        let names = &n.children[0];
        assert_eq!(names.kind, NodeKind::Names);
        assert_eq!(names.children.len(), 2);
        assert_eq!(names.children[1].args, vec!["hi".to_string()]);
    }

    #[test]
    fn tree_parses_from_json() {
        let src = r#"{
            "kind": "pipe",
            "args": [""],
            "children": [{
                "kind": "cmd",
                "children": [{"kind": "names", "children": [{"kind": "name", "args": ["true"]}]}],
                "redirs": [{"pipe": {"from": "out", "to": "in"}}]
            }]
        }"#;
        let n: Node = serde_json::from_str(src).unwrap();
        assert_eq!(n.kind, NodeKind::Pipe);
        assert_eq!(
            n.children[0].redirs,
            vec![Redirection::Pipe {
                from: "out".into(),
                to: "in".into()
            }]
        );
    }

    #[test]
    fn display_is_compact() {
        let n = Node::app(Node::name("a"), Node::val("x"));
        assert_eq!(n.to_string(), r#"app(name["a"] val["x"])"#);
    }
}
