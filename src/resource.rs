//! Hierarchical resource resolution.
//!
//! Instead of scanning a flat table, a [`ResourceTree`] walks named children
//! one path segment at a time. A directory tries its literal child first
//! and falls back to its `:param` child when the literal branch cannot answer
//! the rest of the request, matching the flat table's first-match order. A placeholder child may be lazy: its node is built by a
//! factory the first time a given segment value is seen and memoized after
//! that.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::routes::{
    decode_segment, split_path, CommandMatcher, HttpMethod, MatchError, RouteError, RouteMatch, RouteTable,
    Segment, UriTemplate,
};

/// Upper bound on memoized nodes per lazy placeholder. Past this, nodes are
/// still built on demand but no longer cached.
const MAX_LAZY_CHILDREN: usize = 256;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("route already registered: {0} {1}")]
    Duplicate(HttpMethod, String),
    #[error("conflicting placeholder names at {template}: :{existing} vs :{requested}")]
    ParamConflict {
        template: String,
        existing: String,
        requested: String,
    },
    #[error("wildcard templates are not supported in resource trees: {0}")]
    Wildcard(String),
    #[error(transparent)]
    Template(#[from] RouteError),
}

/// A terminal resource: the commands it answers, per method.
#[derive(Debug, Clone, Default)]
pub struct Leaf {
    methods: Vec<(HttpMethod, String)>,
}

impl Leaf {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `command` to `method`, replacing any earlier binding.
    pub fn on(mut self, method: HttpMethod, command: impl Into<String>) -> Self {
        self.methods.retain(|(m, _)| *m != method);
        self.methods.push((method, command.into()));
        self
    }

    fn bind(&mut self, method: HttpMethod, command: String) -> bool {
        if self.command_for(method).is_some() {
            return false;
        }
        self.methods.push((method, command));
        true
    }

    pub fn command_for(&self, method: HttpMethod) -> Option<&str> {
        self.methods
            .iter()
            .find(|(m, _)| *m == method)
            .map(|(_, c)| c.as_str())
    }

    pub fn methods(&self) -> Vec<HttpMethod> {
        self.methods.iter().map(|(m, _)| *m).collect()
    }
}

type NodeFactory = Arc<dyn Fn(&str) -> Resource + Send + Sync>;

/// A placeholder child whose nodes are created per segment value.
pub struct LazyNode {
    factory: NodeFactory,
    cache: RwLock<HashMap<String, Arc<Resource>>>,
}

impl LazyNode {
    fn get_or_build(&self, segment: &str) -> Arc<Resource> {
        if let Some(node) = self.cache.read().get(segment) {
            return node.clone();
        }
        let node = Arc::new((self.factory)(segment));
        let mut cache = self.cache.write();
        if let Some(existing) = cache.get(segment) {
            return existing.clone();
        }
        if cache.len() < MAX_LAZY_CHILDREN {
            cache.insert(segment.to_string(), node.clone());
        }
        node
    }

    /// Number of memoized nodes.
    pub fn cached(&self) -> usize {
        self.cache.read().len()
    }
}

impl Clone for LazyNode {
    fn clone(&self) -> Self {
        Self {
            factory: self.factory.clone(),
            cache: RwLock::new(HashMap::new()),
        }
    }
}

impl std::fmt::Debug for LazyNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyNode")
            .field("cached", &self.cached())
            .finish()
    }
}

#[derive(Debug, Clone)]
enum ParamNode {
    Static(Arc<Resource>),
    Lazy(LazyNode),
}

#[derive(Debug, Clone)]
struct ParamChild {
    name: String,
    node: ParamNode,
}

/// A resource with named children and an optional resource of its own.
#[derive(Debug, Clone, Default)]
pub struct Directory {
    children: Vec<(String, Arc<Resource>)>,
    param: Option<ParamChild>,
    index: Option<Leaf>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_child(mut self, name: impl Into<String>, child: impl Into<Resource>) -> Self {
        self.children.push((name.into(), Arc::new(child.into())));
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, child: impl Into<Resource>) -> Self {
        self.param = Some(ParamChild {
            name: name.into(),
            node: ParamNode::Static(Arc::new(child.into())),
        });
        self
    }

    pub fn with_lazy_param<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&str) -> Resource + Send + Sync + 'static,
    {
        self.param = Some(ParamChild {
            name: name.into(),
            node: ParamNode::Lazy(LazyNode {
                factory: Arc::new(factory),
                cache: RwLock::new(HashMap::new()),
            }),
        });
        self
    }

    pub fn with_index(mut self, leaf: Leaf) -> Self {
        self.index = Some(leaf);
        self
    }

    /// Look up the child for one path segment, with the placeholder capture
    /// it produced, if any. A literal child shadows the placeholder.
    pub fn child(&self, segment: &str) -> Option<(Arc<Resource>, Option<(String, String)>)> {
        if let Some(node) = self.literal(segment) {
            return Some((node, None));
        }
        self.param_child(segment)
            .map(|(name, node)| (node, Some((name.to_string(), decode_segment(segment)))))
    }

    fn literal(&self, segment: &str) -> Option<Arc<Resource>> {
        self.children
            .iter()
            .find(|(name, _)| name == segment)
            .map(|(_, node)| node.clone())
    }

    fn param_child(&self, segment: &str) -> Option<(&str, Arc<Resource>)> {
        let param = self.param.as_ref()?;
        if segment.is_empty() {
            return None;
        }
        let node = match &param.node {
            ParamNode::Static(node) => node.clone(),
            ParamNode::Lazy(lazy) => lazy.get_or_build(segment),
        };
        Some((param.name.as_str(), node))
    }

    fn literal_mut(&mut self, name: &str) -> &mut Resource {
        let pos = match self.children.iter().position(|(n, _)| n == name) {
            Some(pos) => pos,
            None => {
                self.children
                    .push((name.to_string(), Arc::new(Resource::Leaf(Leaf::new()))));
                self.children.len() - 1
            }
        };
        Arc::make_mut(&mut self.children[pos].1)
    }

    fn param_mut(&mut self, name: &str, template: &str) -> Result<&mut Resource, TreeError> {
        let param = self.param.get_or_insert_with(|| ParamChild {
            name: name.to_string(),
            node: ParamNode::Static(Arc::new(Resource::Leaf(Leaf::new()))),
        });
        if param.name != name {
            return Err(TreeError::ParamConflict {
                template: template.to_string(),
                existing: param.name.clone(),
                requested: name.to_string(),
            });
        }
        match &mut param.node {
            ParamNode::Static(node) => Ok(Arc::make_mut(node)),
            // A lazy placeholder owns everything beneath it.
            ParamNode::Lazy(_) => Err(TreeError::ParamConflict {
                template: template.to_string(),
                existing: format!("{} (lazy)", param.name),
                requested: name.to_string(),
            }),
        }
    }
}

/// A node in a resource tree.
#[derive(Debug, Clone)]
pub enum Resource {
    Leaf(Leaf),
    Directory(Directory),
}

impl From<Leaf> for Resource {
    fn from(leaf: Leaf) -> Self {
        Resource::Leaf(leaf)
    }
}

impl From<Directory> for Resource {
    fn from(dir: Directory) -> Self {
        Resource::Directory(dir)
    }
}

impl Resource {
    /// The leaf that answers requests addressed to this node itself.
    pub fn leaf(&self) -> Option<&Leaf> {
        match self {
            Resource::Leaf(leaf) => Some(leaf),
            Resource::Directory(dir) => dir.index.as_ref(),
        }
    }

    fn as_directory_mut(&mut self) -> &mut Directory {
        if let Resource::Leaf(leaf) = self {
            let leaf = std::mem::take(leaf);
            let index = (!leaf.methods.is_empty()).then_some(leaf);
            *self = Resource::Directory(Directory {
                index,
                ..Directory::default()
            });
        }
        match self {
            Resource::Directory(dir) => dir,
            Resource::Leaf(_) => unreachable!("converted to a directory above"),
        }
    }

    fn leaf_mut(&mut self) -> &mut Leaf {
        match self {
            Resource::Leaf(leaf) => leaf,
            Resource::Directory(dir) => dir.index.get_or_insert_with(Leaf::new),
        }
    }
}

/// Outcome of walking the tree as far as the path allows.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub node: Arc<Resource>,
    pub consumed: usize,
    pub params: HashMap<String, String>,
}

type Visitor<'a> = dyn FnMut(&Arc<Resource>, usize, &HashMap<String, String>) -> ControlFlow<()> + 'a;

/// Depth-first walk visiting every node reachable along `segments`. At each
/// directory the literal child is explored before the placeholder child, so
/// nodes are visited in the order a flat table would try them.
fn walk(
    node: &Arc<Resource>,
    segments: &[&str],
    consumed: usize,
    params: &mut HashMap<String, String>,
    visit: &mut Visitor<'_>,
) -> ControlFlow<()> {
    visit(node, consumed, params)?;
    let (Resource::Directory(dir), Some(segment)) = (node.as_ref(), segments.get(consumed)) else {
        return ControlFlow::Continue(());
    };
    if let Some(child) = dir.literal(segment) {
        walk(&child, segments, consumed + 1, params, visit)?;
    }
    if let Some((name, child)) = dir.param_child(segment) {
        let name = name.to_string();
        params.insert(name.clone(), decode_segment(segment));
        let flow = walk(&child, segments, consumed + 1, params, visit);
        params.remove(&name);
        flow?;
    }
    ControlFlow::Continue(())
}

/// Walk from `root` along `segments`. Returns the first node that consumes
/// the whole path and answers requests itself; failing that, the deepest
/// node reached.
pub fn resolve(root: &Arc<Resource>, segments: &[&str]) -> Resolution {
    let mut best = Resolution {
        node: root.clone(),
        consumed: 0,
        params: HashMap::new(),
    };
    let _ = walk(root, segments, 0, &mut HashMap::new(), &mut |node, consumed, params| {
        let complete = consumed == segments.len() && node.leaf().is_some();
        if complete || consumed > best.consumed {
            best = Resolution {
                node: node.clone(),
                consumed,
                params: params.clone(),
            };
        }
        if complete {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    });
    best
}

/// A tree of resources rooted at `/`.
#[derive(Debug, Clone)]
pub struct ResourceTree {
    root: Arc<Resource>,
}

impl Default for ResourceTree {
    fn default() -> Self {
        Self::new(Directory::new())
    }
}

impl ResourceTree {
    pub fn new(root: impl Into<Resource>) -> Self {
        Self {
            root: Arc::new(root.into()),
        }
    }

    /// Build a tree answering the same requests as `table`.
    pub fn from_table(table: &RouteTable) -> Result<Self, TreeError> {
        let mut tree = Self::default();
        for route in table.routes() {
            tree.insert(route.method, &route.template, route.command.clone())?;
        }
        Ok(tree)
    }

    pub fn root(&self) -> &Arc<Resource> {
        &self.root
    }

    /// Register `command` at `template` for `method`, creating directories
    /// along the way.
    pub fn insert(
        &mut self,
        method: HttpMethod,
        template: &UriTemplate,
        command: String,
    ) -> Result<(), TreeError> {
        let node = self.node_at(template)?;
        if node.leaf_mut().bind(method, command) {
            Ok(())
        } else {
            Err(TreeError::Duplicate(method, template.as_str().to_string()))
        }
    }

    /// Install a lazily-populated placeholder child under the directory at
    /// `template`.
    pub fn insert_lazy<F>(
        &mut self,
        template: &UriTemplate,
        param: &str,
        factory: F,
    ) -> Result<(), TreeError>
    where
        F: Fn(&str) -> Resource + Send + Sync + 'static,
    {
        let dir = self.node_at(template)?.as_directory_mut();
        if let Some(existing) = &dir.param {
            return Err(TreeError::ParamConflict {
                template: template.as_str().to_string(),
                existing: existing.name.clone(),
                requested: param.to_string(),
            });
        }
        let taken = std::mem::take(dir);
        *dir = taken.with_lazy_param(param, factory);
        Ok(())
    }

    fn node_at(&mut self, template: &UriTemplate) -> Result<&mut Resource, TreeError> {
        let mut node = Arc::make_mut(&mut self.root);
        for segment in template.segments() {
            let dir = node.as_directory_mut();
            node = match segment {
                Segment::Literal(name) => dir.literal_mut(name),
                Segment::Param(name) => dir.param_mut(name, template.as_str())?,
                Segment::Wildcard => {
                    return Err(TreeError::Wildcard(template.as_str().to_string()))
                }
            };
        }
        Ok(node)
    }
}

impl CommandMatcher for ResourceTree {
    fn match_request(&self, method: HttpMethod, path: &str) -> Result<RouteMatch, MatchError> {
        let segments = split_path(path);
        let mut found = None;
        let mut allowed = Vec::new();
        let _ = walk(
            &self.root,
            &segments,
            0,
            &mut HashMap::new(),
            &mut |node, consumed, params| {
                if consumed < segments.len() {
                    return ControlFlow::Continue(());
                }
                let Some(leaf) = node.leaf() else {
                    return ControlFlow::Continue(());
                };
                if let Some(command) = leaf.command_for(method) {
                    found = Some(RouteMatch {
                        command: command.to_string(),
                        params: params.clone(),
                    });
                    return ControlFlow::Break(());
                }
                for m in leaf.methods() {
                    if !allowed.contains(&m) {
                        allowed.push(m);
                    }
                }
                ControlFlow::Continue(())
            },
        );
        match found {
            Some(found) => Ok(found),
            None if allowed.is_empty() => Err(MatchError::NotFound),
            None => Err(MatchError::MethodNotAllowed(allowed)),
        }
    }
}

/// The JSON Wire command set as a resource tree. CSS property nodes under
/// `element/:id/css` are created lazily per property name.
pub fn wire_resource_tree() -> Result<ResourceTree, TreeError> {
    let mut tree = ResourceTree::default();
    let css = UriTemplate::parse("/session/:sessionId/element/:id/css/:propertyName")?;
    for &(method, template, command) in crate::routes::WIRE_ROUTES {
        let template = UriTemplate::parse(template)?;
        if template.same_shape(&css) {
            continue;
        }
        tree.insert(method, &template, command.to_string())?;
    }
    let css_dir = UriTemplate::parse("/session/:sessionId/element/:id/css")?;
    tree.insert_lazy(&css_dir, "propertyName", |_name| {
        Leaf::new()
            .on(HttpMethod::Get, "getElementValueOfCssProperty")
            .into()
    })?;
    Ok(tree)
}
