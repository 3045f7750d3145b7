//! Per-method radix trie for routes with `:name`/`*name` segments.
//!
//! Static (all-literal) routes never enter this trie at all - `Router`
//! keeps those in a flat hash table and only falls back to the trie on a
//! miss there, so the common case of a purely literal path never pays
//! for segment-by-segment matching.

use super::DynHandler;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// `true` if a route pattern has no `:name`/`*name` segments and can live
/// in the flat static table instead of a trie node.
pub(super) fn is_static(pattern: &str) -> bool {
    pattern
        .split('/')
        .all(|seg| !seg.starts_with(':') && !seg.starts_with('*'))
}

struct ParamNode {
    name: &'static str,
    node: RadixNode,
}

#[derive(Default)]
struct RadixNode {
    literal: FxHashMap<Box<str>, RadixNode>,
    param: Option<Box<ParamNode>>,
    wildcard: Option<(&'static str, Arc<dyn DynHandler>)>,
    handler: Option<Arc<dyn DynHandler>>,
}

impl RadixNode {
    fn insert(&mut self, segments: &[&str], handler: Arc<dyn DynHandler>) {
        let Some((seg, rest)) = segments.split_first() else {
            assert!(
                self.handler.replace(handler).is_none(),
                "duplicate route registered for this method and pattern"
            );
            return;
        };

        if let Some(name) = seg.strip_prefix('*') {
            assert!(
                rest.is_empty(),
                "a *wildcard segment must be the last segment in a pattern"
            );
            let name: &'static str = Box::leak(name.to_string().into_boxed_str());
            assert!(
                self.wildcard.replace((name, handler)).is_none(),
                "duplicate wildcard route registered for this method and pattern"
            );
        } else if let Some(name) = seg.strip_prefix(':') {
            let name: &'static str = Box::leak(name.to_string().into_boxed_str());
            let entry = self.param.get_or_insert_with(|| {
                Box::new(ParamNode {
                    name,
                    node: RadixNode::default(),
                })
            });
            assert_eq!(
                entry.name, name,
                "conflicting parameter names for the same path position"
            );
            entry.node.insert(rest, handler);
        } else {
            self.literal
                .entry((*seg).into())
                .or_default()
                .insert(rest, handler);
        }
    }

    /// Returns the matched handler and every `(name, value)` pair captured
    /// along the way. Literal children are tried before the named-param
    /// child, which is tried before a wildcard, at every level - a
    /// literal sibling always wins over a parameter for the same segment,
    /// and a parameter always wins over a wildcard.
    fn lookup(
        &self,
        segments: &[&str],
        out: &mut Vec<(&'static str, Vec<u8>)>,
    ) -> Option<Arc<dyn DynHandler>> {
        match segments.split_first() {
            None => self.handler.clone(),
            Some((seg, rest)) => {
                if let Some(child) = self.literal.get(*seg) {
                    let before = out.len();
                    if let Some(h) = child.lookup(rest, out) {
                        return Some(h);
                    }
                    out.truncate(before);
                }

                if let Some(param) = self.param.as_ref() {
                    let before = out.len();
                    out.push((param.name, seg.as_bytes().to_vec()));
                    if let Some(h) = param.node.lookup(rest, out) {
                        return Some(h);
                    }
                    out.truncate(before);
                }

                if let Some((name, handler)) = self.wildcard.as_ref() {
                    out.push((name, segments.join("/").into_bytes()));
                    return Some(Arc::clone(handler));
                }

                None
            }
        }
    }
}

/// One trie per HTTP method, matching the order `Router` indexes its
/// per-method array in.
#[derive(Default)]
pub(super) struct MethodTrie {
    root: RadixNode,
}

impl MethodTrie {
    pub(super) fn insert(&mut self, pattern: &str, handler: Arc<dyn DynHandler>) {
        let segments: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
        self.root.insert(&segments, handler);
    }

    pub(super) fn lookup(
        &self,
        path: &[u8],
    ) -> Option<(Arc<dyn DynHandler>, Vec<(&'static str, Vec<u8>)>)> {
        let path = std::str::from_utf8(path).ok()?;
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut captured = Vec::new();
        let handler = self.root.lookup(&segments, &mut captured)?;
        Some((handler, captured))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::{Context, Handler};
    use crate::{Request, Response, StatusCode};

    fn noop() -> Arc<dyn DynHandler> {
        Arc::new(|_ctx: &mut Context, _req: &Request, resp: &mut Response| async move {
            Ok(resp.status(StatusCode::Ok).body(""))
        })
    }

    #[test]
    fn is_static_detects_dynamic_segments() {
        assert!(is_static("/a/b/c"));
        assert!(!is_static("/a/:b"));
        assert!(!is_static("/a/*b"));
    }

    #[test]
    fn literal_beats_param_at_same_depth() {
        let mut trie = MethodTrie::default();
        trie.insert("/a/lit", noop());
        trie.insert("/a/:name", noop());

        let (_, params) = trie.lookup(b"/a/lit").unwrap();
        assert!(params.is_empty());
    }

    #[test]
    fn param_beats_wildcard_at_same_depth() {
        let mut trie = MethodTrie::default();
        trie.insert("/a/:name", noop());
        trie.insert("/a/*rest", noop());

        let (_, params) = trie.lookup(b"/a/x").unwrap();
        assert_eq!(params, vec![("name", b"x".to_vec())]);
    }

    #[test]
    fn wildcard_captures_full_remainder() {
        let mut trie = MethodTrie::default();
        trie.insert("/files/*rest", noop());

        let (_, params) = trie.lookup(b"/files/a/b/c").unwrap();
        assert_eq!(params, vec![("rest", b"a/b/c".to_vec())]);
    }

    #[test]
    fn no_match_returns_none() {
        let mut trie = MethodTrie::default();
        trie.insert("/a/:name", noop());
        assert!(trie.lookup(b"/a").is_none());
        assert!(trie.lookup(b"/a/b/c").is_none());
    }
}
