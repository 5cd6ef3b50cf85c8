//! Trie-based URI dispatcher (spec §4.A).
//!
//! Routes a concrete path like `/3fa.../ep/1/r/faulted` to a registered
//! handler, extracting wildcard segments along the way. Used both to index
//! the data model (component B) and, wrapped by the daemon's HTTP surface,
//! to address external RPC-like endpoints.
//!
//! Registration is not thread-safe with concurrent lookups: callers build
//! the dispatcher up front and publish it (e.g. behind an `Arc`) before any
//! lookup runs, the same discipline the teacher's `routerify::Router`
//! builder imposes (`Router::builder()...build()` then serve).

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

/// Variable bindings extracted from a concrete path during lookup.
pub type Bindings = HashMap<String, String>;

/// A directive transforms the raw wildcard token before it's inserted into
/// the bindings map. Returning `None` means "no transform": the raw token is
/// stored verbatim.
pub type DirectiveFn = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("template is empty or malformed: {0}")]
    Invalid(String),

    #[error("conflicting wildcard name or directive at the same position: {0}")]
    DuplicateVar(String),

    #[error("a handler is already registered for this template")]
    DuplicateHandler,

    #[error("unknown directive: {0}")]
    UnknownDirective(String),
}

/// One parsed template segment.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Wildcard { name: String, directive: Option<String> },
}

fn parse_segment(raw: &str) -> Result<Segment, DispatchError> {
    if raw.is_empty() {
        return Err(DispatchError::Invalid(
            "empty path segment in template".into(),
        ));
    }

    if let Some(inner) = raw.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
        if inner.is_empty() {
            return Err(DispatchError::Invalid("empty wildcard name".into()));
        }
        return Ok(match inner.split_once('#') {
            Some((name, directive)) => {
                if name.is_empty() || directive.is_empty() {
                    return Err(DispatchError::Invalid(format!(
                        "malformed wildcard: [{inner}]"
                    )));
                }
                Segment::Wildcard {
                    name: name.to_string(),
                    directive: Some(directive.to_string()),
                }
            }
            None => Segment::Wildcard {
                name: inner.to_string(),
                directive: None,
            },
        });
    }

    Ok(Segment::Literal(raw.to_string()))
}

fn tokenize(template: &str) -> Result<Vec<Segment>, DispatchError> {
    let template = template.strip_prefix('/').unwrap_or(template);
    if template.is_empty() {
        return Err(DispatchError::Invalid("template has no segments".into()));
    }
    template.split('/').map(parse_segment).collect()
}

struct Node<H> {
    literal_children: HashMap<String, Node<H>>,
    wildcard_child: Option<Box<WildcardNode<H>>>,
    handler: Option<(H, String)>,
}

struct WildcardNode<H> {
    name: String,
    directive: Option<String>,
    node: Node<H>,
}

impl<H> Default for Node<H> {
    fn default() -> Self {
        Self {
            literal_children: HashMap::new(),
            wildcard_child: None,
            handler: None,
        }
    }
}

/// A rooted trie mapping URI templates to handlers of type `H`.
pub struct Dispatcher<H> {
    root: Node<H>,
    directives: HashMap<String, DirectiveFn>,
}

impl<H> Default for Dispatcher<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> Dispatcher<H> {
    pub fn new() -> Self {
        Self {
            root: Node::default(),
            directives: HashMap::new(),
        }
    }

    /// Registers a named directive. Fails if the name is already taken.
    pub fn register_directive(
        &mut self,
        name: impl Into<String>,
        f: DirectiveFn,
    ) -> Result<(), DispatchError> {
        let name = name.into();
        if self.directives.contains_key(&name) {
            return Err(DispatchError::DuplicateVar(name));
        }
        self.directives.insert(name, f);
        Ok(())
    }

    /// Registers `template` with a human-readable `desc` and `handler`.
    pub fn register(
        &mut self,
        template: &str,
        desc: impl Into<String>,
        handler: H,
    ) -> Result<(), DispatchError> {
        let segments = tokenize(template)?;

        for seg in &segments {
            if let Segment::Wildcard {
                directive: Some(d), ..
            } = seg
            {
                if !self.directives.contains_key(d) {
                    return Err(DispatchError::UnknownDirective(d.clone()));
                }
            }
        }

        let mut node = &mut self.root;
        for seg in segments {
            node = match seg {
                Segment::Literal(lit) => node
                    .literal_children
                    .entry(lit.to_lowercase())
                    .or_insert_with(Node::default),
                Segment::Wildcard { name, directive } => {
                    match &node.wildcard_child {
                        Some(existing) if existing.name != name || existing.directive != directive => {
                            return Err(DispatchError::DuplicateVar(name));
                        }
                        _ => {}
                    }
                    let child = node.wildcard_child.get_or_insert_with(|| {
                        Box::new(WildcardNode {
                            name,
                            directive,
                            node: Node::default(),
                        })
                    });
                    &mut child.node
                }
            };
        }

        if node.handler.is_some() {
            return Err(DispatchError::DuplicateHandler);
        }
        node.handler = Some((handler, desc.into()));
        Ok(())
    }

    /// Resolves `path` to a handler plus extracted bindings.
    pub fn lookup(&self, path: &str) -> Option<(&H, &str, Bindings)>
    where
        H: Clone,
    {
        let path = path.strip_prefix('/').unwrap_or(path);
        if path.is_empty() {
            return None;
        }

        let mut bindings = Bindings::new();
        let mut node = &self.root;

        for token in path.split('/') {
            if token.is_empty() {
                return None;
            }

            if let Some(child) = node.literal_children.get(&token.to_lowercase()) {
                node = child;
                continue;
            }

            if let Some(wc) = &node.wildcard_child {
                let value = match &wc.directive {
                    Some(name) => {
                        let f = self.directives.get(name)?;
                        f(token).unwrap_or_else(|| token.to_string())
                    }
                    None => token.to_string(),
                };
                bindings.insert(wc.name.clone(), value);
                node = &wc.node;
                continue;
            }

            return None;
        }

        let (handler, desc) = node.handler.as_ref()?;
        Some((handler, desc.as_str(), bindings))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn basic_wildcard_roundtrip() {
        let mut d: Dispatcher<&'static str> = Dispatcher::new();
        d.register("/s/[n]/e/[id]", "desc", "handler").unwrap();

        let (h, desc, vars) = d.lookup("/s/foo/e/42").unwrap();
        assert_eq!(*h, "handler");
        assert_eq!(desc, "desc");
        assert_eq!(vars.get("n").unwrap(), "foo");
        assert_eq!(vars.get("id").unwrap(), "42");
    }

    #[test]
    fn directive_transform() {
        let mut d: Dispatcher<&'static str> = Dispatcher::new();
        d.register_directive(
            "hex",
            Arc::new(|tok: &str| u32::from_str_radix(tok, 16).ok().map(|v| v.to_string())),
        )
        .unwrap();
        d.register("/s/[n]/e/[id#hex]", "desc", "h").unwrap();

        let (_, _, vars) = d.lookup("/s/foo/e/1A").unwrap();
        assert_eq!(vars.get("n").unwrap(), "foo");
        assert_eq!(vars.get("id").unwrap(), "26");
    }

    #[test]
    fn unknown_directive_rejected() {
        let mut d: Dispatcher<&'static str> = Dispatcher::new();
        let err = d.register("/s/[id#nope]", "desc", "h").unwrap_err();
        assert_eq!(err, DispatchError::UnknownDirective("nope".into()));
    }

    #[test]
    fn duplicate_handler_rejected() {
        let mut d: Dispatcher<&'static str> = Dispatcher::new();
        d.register("/a/[x]", "d1", "h1").unwrap();
        let err = d.register("/a/[x]", "d2", "h2").unwrap_err();
        assert_eq!(err, DispatchError::DuplicateHandler);
    }

    #[test]
    fn conflicting_wildcard_name_rejected() {
        let mut d: Dispatcher<&'static str> = Dispatcher::new();
        d.register("/a/[x]/b", "d1", "h1").unwrap();
        let err = d.register("/a/[y]/c", "d2", "h2").unwrap_err();
        assert_eq!(err, DispatchError::DuplicateVar("y".into()));
    }

    #[test]
    fn missing_segment_is_none() {
        let mut d: Dispatcher<&'static str> = Dispatcher::new();
        d.register("/a/[x]/b", "d1", "h1").unwrap();
        assert!(d.lookup("/a/only").is_none());
        assert!(d.lookup("/a//b").is_none());
    }

    #[test]
    fn literal_takes_priority_over_wildcard() {
        let mut d: Dispatcher<&'static str> = Dispatcher::new();
        d.register("/a/[x]", "wild", "wild-handler").unwrap();
        d.register("/a/fixed", "lit", "lit-handler").unwrap();

        let (h, _, vars) = d.lookup("/a/fixed").unwrap();
        assert_eq!(*h, "lit-handler");
        assert!(vars.is_empty());

        let (h, _, vars) = d.lookup("/a/other").unwrap();
        assert_eq!(*h, "wild-handler");
        assert_eq!(vars.get("x").unwrap(), "other");
    }

    #[test]
    fn register_and_lookup_device_style_uris() {
        let mut d: Dispatcher<&'static str> = Dispatcher::new();
        d.register("/[uuid]", "device", "device").unwrap();
        d.register("/[uuid]/ep/[ep]", "endpoint", "endpoint")
            .unwrap();
        d.register("/[uuid]/ep/[ep]/r/[rid]", "resource", "resource")
            .unwrap();

        let (h, _, vars) = d.lookup("/abc-123/ep/1/r/faulted").unwrap();
        assert_eq!(*h, "resource");
        assert_eq!(vars.get("uuid").unwrap(), "abc-123");
        assert_eq!(vars.get("ep").unwrap(), "1");
        assert_eq!(vars.get("rid").unwrap(), "faulted");
    }
}
