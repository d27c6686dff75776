//! C header synthesis from a parsed BTF type graph.
//!
//! The pipeline works on its own snapshot of the store and runs in fixed
//! stages: adjust names for C's namespaces, materialize struct padding,
//! build the dependency tree, break typedef/aggregate cycles with synthetic
//! forward declarations, order the result topologically and render it.

mod render;

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::collections::HashSet;

use anyhow::bail;
use anyhow::ensure;
use anyhow::Context as _;
use anyhow::Result;
use tracing::debug;

use btfparse::Btf;
use btfparse::BtfFwd;
use btfparse::BtfFwdKind;
use btfparse::BtfInt;
use btfparse::BtfKind;
use btfparse::BtfMember;
use btfparse::BtfType;
use btfparse::IntEncoding;

use render::Renderer;

pub(crate) fn generate(btf: &Btf) -> Result<String> {
    let mut ctx = GenCtx::new(btf)?;
    debug!(types = ctx.types.len(), "snapshotted type store");

    ctx.adjust_type_names()?;
    ctx.scan_types();
    debug!(top_level = ctx.top_level.len(), "scanned top-level types");

    ctx.materialize_padding()?;
    ctx.build_dep_tree()?;
    ctx.break_typedef_loops()?;
    ctx.build_queue()?;
    debug!(queued = ctx.queue.len(), "type queue ready");

    Renderer::new(&ctx).render(&ctx.queue)
}

/// Working copy of the type graph plus everything the passes accumulate.
/// The parsed [`Btf`] itself is never mutated.
pub(crate) struct GenCtx {
    /// Id-ordered snapshot of every parsed record (void excluded).
    types: BTreeMap<u32, BtfType>,
    ptr_size: u32,
    /// Struct/union/enum/typedef/fwd ids that become statements.
    top_level: BTreeSet<u32>,
    /// Tag name to forward-declaration id; one forward per tag.
    fwd_ids: HashMap<String, u32>,
    /// The synthetic one-byte int every padding member refers to.
    padding_byte_id: u32,
    next_id: u32,
    /// Parent to child links; `true` marks a weak (pointer) edge.
    deps: BTreeMap<u32, BTreeMap<u32, bool>>,
    queue: Vec<u32>,
}

impl GenCtx {
    fn new(btf: &Btf) -> Result<Self> {
        let mut types = BTreeMap::new();
        for (id, ty) in btf.types().iter().enumerate().skip(1) {
            types.insert(id as u32, ty.clone());
        }
        ensure!(!types.is_empty(), "the type store holds no types");

        Ok(Self {
            types,
            ptr_size: btf.ptr_size(),
            top_level: BTreeSet::new(),
            fwd_ids: HashMap::new(),
            padding_byte_id: 0,
            next_id: 0,
            deps: BTreeMap::new(),
            queue: Vec::new(),
        })
    }

    pub(crate) fn type_by_id(&self, id: u32) -> Option<&BtfType> {
        self.types.get(&id)
    }

    /// The name a type declares or references itself by; `None` for kinds
    /// without one and for anonymous aggregates.
    pub(crate) fn type_name(&self, id: u32) -> Option<String> {
        match self.types.get(&id)? {
            BtfType::Struct(t) | BtfType::Union(t) => t.name.clone(),
            BtfType::Enum(t) => t.name.clone(),
            BtfType::Typedef(t) => Some(t.name.clone()),
            BtfType::Fwd(t) => Some(t.name.clone()),
            BtfType::Int(t) => Some(t.name.clone()),
            _ => None,
        }
    }

    fn set_type_name(&mut self, id: u32, name: String) -> Result<()> {
        match self.types.get_mut(&id) {
            Some(BtfType::Struct(t)) | Some(BtfType::Union(t)) => t.name = Some(name),
            Some(BtfType::Enum(t)) => t.name = Some(name),
            Some(BtfType::Typedef(t)) => t.name = name,
            Some(BtfType::Fwd(t)) => t.name = name,
            _ => bail!("BTF type #{id} cannot be renamed"),
        }
        Ok(())
    }

    /// C keeps struct/union/enum tags, ordinary identifiers and enumerator
    /// names in namespaces BTF does not enforce. Walk in id order and rename
    /// whatever collides.
    fn adjust_type_names(&mut self) -> Result<()> {
        let mut seen: HashSet<String> = HashSet::new();
        let ids: Vec<u32> = self.types.keys().copied().collect();

        for id in ids {
            let (can_name, can_rename, tagged, is_enum) = match self.types[&id].kind() {
                BtfKind::Struct | BtfKind::Union => (true, true, true, false),
                BtfKind::Enum => (true, true, true, true),
                BtfKind::Typedef => (true, true, false, false),
                BtfKind::Int => (true, false, false, false),
                _ => (false, false, false, false),
            };

            if can_name {
                let name = match self.type_name(id) {
                    Some(name) => Some(name),
                    None if is_enum => {
                        // Anonymous enums get referenced by name from other
                        // declarations; give them a stable synthetic one.
                        let name = format!("AnonymousEnum{id}");
                        self.set_type_name(id, name.clone())?;
                        Some(name)
                    }
                    None => None,
                };

                if let Some(mut name) = name {
                    let mut key = namespace_key(tagged, &name);
                    if seen.contains(&key) {
                        ensure!(
                            can_rename,
                            "name `{name}` collides and BTF type #{id} cannot be renamed"
                        );
                        name = format!("{name}_{id}");
                        self.set_type_name(id, name.clone())?;
                        key = namespace_key(tagged, &name);
                    }
                    seen.insert(key);
                }
            }

            if is_enum {
                if let Some(BtfType::Enum(enum_type)) = self.types.get_mut(&id) {
                    let rename = enum_type.values.iter().any(|v| seen.contains(&v.name));
                    if rename {
                        let Some(enum_name) = enum_type.name.clone() else {
                            bail!("enum #{id} has no name after adjustment");
                        };
                        for value in &mut enum_type.values {
                            value.name = format!("{enum_name}_{}", value.name);
                        }
                    }
                    for value in &enum_type.values {
                        seen.insert(value.name.clone());
                    }
                }
            }
        }

        Ok(())
    }

    /// Collects the ids that become top-level statements, seeds the forward
    /// memo with parsed forwards and primes the synthetic-id counter.
    fn scan_types(&mut self) {
        self.top_level.clear();
        let mut highest = 0;

        let ids: Vec<u32> = self.types.keys().copied().collect();
        for id in ids {
            highest = highest.max(id);

            match self.types[&id].kind() {
                BtfKind::Struct
                | BtfKind::Union
                | BtfKind::Enum
                | BtfKind::Typedef
                | BtfKind::Fwd => {}
                _ => continue,
            }

            let Some(name) = self.type_name(id) else {
                continue;
            };

            if self.types[&id].kind() == BtfKind::Fwd {
                self.fwd_ids.insert(name, id);
            }
            self.top_level.insert(id);
        }

        self.next_id = highest + 1;
    }

    fn generate_type_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Synthesizes a one-byte int record and turns every implicit struct
    /// gap into explicit members of it.
    fn materialize_padding(&mut self) -> Result<()> {
        let byte_type = BtfInt {
            name: "unsigned char".to_string(),
            size: 1,
            encoding: IntEncoding::None,
            offset: 0,
            bits: 8,
        };
        self.padding_byte_id = self.generate_type_id();
        self.types
            .insert(self.padding_byte_id, BtfType::Int(byte_type));

        let struct_ids: Vec<u32> = self
            .types
            .iter()
            .filter(|(_, ty)| ty.kind() == BtfKind::Struct)
            .map(|(&id, _)| id)
            .collect();

        for id in struct_ids {
            self.materialize_struct_padding(id)
                .with_context(|| format!("BTF type #{id}"))?;
        }

        Ok(())
    }

    fn materialize_struct_padding(&mut self, id: u32) -> Result<()> {
        let (size, members) = match self.types.get(&id) {
            Some(BtfType::Struct(t)) => (t.size, t.members.clone()),
            _ => bail!("not a struct"),
        };

        let padding_byte_id = self.padding_byte_id;
        let pad_member = |offset: u32, bits: u8| BtfMember {
            name: None,
            type_id: padding_byte_id,
            bit_offset: offset,
            bitfield_size: Some(bits),
        };
        let fill_gap = |rebuilt: &mut Vec<BtfMember>, current: &mut u32, upto: u32| {
            let gap = upto - *current;
            for _ in 0..gap / 8 {
                rebuilt.push(pad_member(*current, 8));
                *current += 8;
            }
            let bit_padding = gap % 8;
            if bit_padding != 0 {
                rebuilt.push(pad_member(*current, bit_padding as u8));
                *current += bit_padding;
            }
        };

        let mut rebuilt = Vec::with_capacity(members.len());
        let mut current: u32 = 0;

        for member in members {
            ensure!(
                current <= member.bit_offset,
                "member at bit offset {} overlaps the previous one",
                member.bit_offset
            );
            if member.bit_offset != current {
                fill_gap(&mut rebuilt, &mut current, member.bit_offset);
            }

            let advance = match member.bitfield_size {
                Some(bits) if bits != 0 => u32::from(bits),
                _ => self
                    .bit_size_of(member.type_id)
                    .with_context(|| format!("cannot size member of type #{}", member.type_id))?,
            };

            rebuilt.push(member);
            current += advance;
        }

        let total = size * 8;
        ensure!(current <= total, "members overrun the declared size");
        if current != total {
            fill_gap(&mut rebuilt, &mut current, total);
        }
        ensure!(
            current == total,
            "padding mismatch: {current} bits covered, {total} expected"
        );

        match self.types.get_mut(&id) {
            Some(BtfType::Struct(t)) => t.members = rebuilt,
            _ => bail!("not a struct"),
        }
        Ok(())
    }

    /// Storage size in bits; `None` for kinds without one.
    fn bit_size_of(&self, id: u32) -> Option<u32> {
        match self.types.get(&id)? {
            BtfType::Int(t) => Some(t.size * 8),
            BtfType::Ptr(_) => Some(self.ptr_size * 8),
            BtfType::Array(t) => Some(self.bit_size_of(t.val_type_id)? * t.nelems),
            BtfType::Struct(t) | BtfType::Union(t) => Some(t.size * 8),
            BtfType::Enum(t) => Some(t.size * 8),
            BtfType::Typedef(t) => self.bit_size_of(t.type_id),
            BtfType::Volatile(t) => self.bit_size_of(t.type_id),
            BtfType::Const(t) => self.bit_size_of(t.type_id),
            BtfType::Float(t) => Some(t.size * 8),
            _ => None,
        }
    }

    /// Ids a record references directly. A typedef of an anonymous
    /// aggregate inherits the aggregate's dependencies instead, since the
    /// body gets emitted inline.
    fn direct_dependencies(&self, id: u32) -> Result<Vec<u32>> {
        let Some(ty) = self.types.get(&id) else {
            bail!("unknown BTF type #{id}");
        };

        let deps = match ty {
            BtfType::Ptr(t) => vec![t.type_id],
            BtfType::Array(t) => vec![t.val_type_id],
            BtfType::Struct(t) | BtfType::Union(t) => {
                t.members.iter().map(|m| m.type_id).collect()
            }
            BtfType::Typedef(t) => {
                let anonymous_aggregate = match self.types.get(&t.type_id) {
                    Some(BtfType::Struct(c)) | Some(BtfType::Union(c)) => c.name.is_none(),
                    _ => false,
                };
                if t.type_id != 0 && anonymous_aggregate {
                    self.direct_dependencies(t.type_id)?
                } else {
                    vec![t.type_id]
                }
            }
            BtfType::Volatile(t) => vec![t.type_id],
            BtfType::Const(t) => vec![t.type_id],
            BtfType::Restrict(t) => vec![t.type_id],
            BtfType::FuncProto(t) => {
                let mut deps = vec![t.ret_type_id];
                deps.extend(t.params.iter().map(|p| p.type_id));
                deps
            }
            _ => Vec::new(),
        };

        Ok(deps)
    }

    /// Builds the forward adjacency over top-level types, skipping through
    /// transparent wrappers so every edge lands on a top-level target.
    fn build_dep_tree(&mut self) -> Result<()> {
        self.deps.clear();
        let mut visited: HashSet<u32> = HashSet::from([0]);

        let top: Vec<u32> = self.top_level.iter().copied().collect();
        for id in top {
            for dep in self.direct_dependencies(id)? {
                self.link_dependency(&mut visited, false, id, dep)?;
            }
        }
        Ok(())
    }

    fn link_dependency(
        &mut self,
        visited: &mut HashSet<u32>,
        inside_pointer: bool,
        parent: u32,
        id: u32,
    ) -> Result<()> {
        if id == 0 {
            return Ok(());
        }

        enum Node {
            Ptr(u32),
            Transparent(u32),
            Proto(Vec<u32>),
            Leaf(BtfKind),
        }

        let node = match self.types.get(&id) {
            None => bail!("dangling reference to BTF type #{id}"),
            Some(BtfType::Ptr(t)) => Node::Ptr(t.type_id),
            Some(BtfType::Array(t)) => Node::Transparent(t.val_type_id),
            Some(BtfType::Volatile(t)) => Node::Transparent(t.type_id),
            Some(BtfType::Const(t)) => Node::Transparent(t.type_id),
            Some(BtfType::Restrict(t)) => Node::Transparent(t.type_id),
            Some(BtfType::FuncProto(t)) => {
                let mut ids = vec![t.ret_type_id];
                ids.extend(t.params.iter().map(|p| p.type_id));
                Node::Proto(ids)
            }
            Some(other) => Node::Leaf(other.kind()),
        };

        let kind = match node {
            Node::Ptr(target) => {
                return self.link_dependency(visited, true, parent, target);
            }
            Node::Transparent(target) => {
                return self.link_dependency(visited, inside_pointer, parent, target);
            }
            Node::Proto(targets) => {
                for target in targets {
                    self.link_dependency(visited, inside_pointer, parent, target)?;
                }
                return Ok(());
            }
            Node::Leaf(kind) => kind,
        };

        if !self.top_level.contains(&id) {
            match kind {
                BtfKind::Struct | BtfKind::Union => {
                    // Anonymous aggregate, emitted inline: its members hang
                    // off the same parent, outside any pointer.
                    for dep in self.direct_dependencies(id)? {
                        self.link_dependency(visited, false, parent, dep)?;
                    }
                    return Ok(());
                }
                BtfKind::Int | BtfKind::Float | BtfKind::Enum => return Ok(()),
                _ => bail!("BTF type #{id} of kind {kind} cannot be depended on"),
            }
        }

        // A forward declaration satisfies a pointer to an aggregate.
        let weak = inside_pointer && matches!(kind, BtfKind::Struct | BtfKind::Union);

        let link = self.deps.entry(parent).or_default().entry(id).or_insert(weak);
        if *link {
            // Weak links upgrade to strong, never the other way.
            *link = weak;
        }

        if !visited.insert(id) {
            return Ok(());
        }

        for dep in self.direct_dependencies(id)? {
            self.link_dependency(visited, false, id, dep)?;
        }
        Ok(())
    }

    fn get_or_create_fwd(&mut self, is_union: bool, name: &str) -> u32 {
        if let Some(&id) = self.fwd_ids.get(name) {
            return id;
        }

        let id = self.generate_type_id();
        self.types.insert(
            id,
            BtfType::Fwd(BtfFwd {
                name: name.to_string(),
                kind: if is_union {
                    BtfFwdKind::Union
                } else {
                    BtfFwdKind::Struct
                },
            }),
        );
        self.fwd_ids.insert(name.to_string(), id);
        id
    }

    /// `typedef struct S {…} S;` decodes as two records that depend on each
    /// other. Rewrite each typedef's back-edge onto a forward declaration,
    /// to fixpoint, then make sure the typedef's other users still pull in
    /// the full struct definition.
    fn break_typedef_loops(&mut self) -> Result<()> {
        let mut rewritten: BTreeMap<u32, u32> = BTreeMap::new();

        loop {
            let mut changed = false;

            let top: Vec<u32> = self.top_level.iter().copied().collect();
            for struct_id in top {
                let is_union = match self.types.get(&struct_id).map(BtfType::kind) {
                    Some(BtfKind::Struct) => false,
                    Some(BtfKind::Union) => true,
                    _ => continue,
                };

                let dep_ids: Vec<u32> = match self.deps.get(&struct_id) {
                    Some(deps) if !deps.is_empty() => deps.keys().copied().collect(),
                    _ => continue,
                };

                let struct_name = self
                    .type_name(struct_id)
                    .with_context(|| format!("top-level aggregate #{struct_id} has no name"))?;

                for typedef_id in dep_ids {
                    if self.types.get(&typedef_id).map(BtfType::kind) != Some(BtfKind::Typedef) {
                        continue;
                    }
                    let depends_back = self
                        .deps
                        .get(&typedef_id)
                        .is_some_and(|deps| deps.contains_key(&struct_id));
                    if !depends_back {
                        continue;
                    }

                    let fwd_id = self.get_or_create_fwd(is_union, &struct_name);
                    if let Some(td_deps) = self.deps.get_mut(&typedef_id) {
                        td_deps.remove(&struct_id);
                        td_deps.insert(fwd_id, false);
                    }

                    rewritten.insert(typedef_id, struct_id);
                    changed = true;
                }
            }

            if !changed {
                break;
            }
        }

        // Everything that referenced the typedef now only reaches a forward
        // declaration of the struct. Re-add a strong edge to the struct for
        // those parents, except inside the struct's own subtree where it
        // would reintroduce the cycle.
        let inverse = self.inverse_dep_tree();
        let mut child_sets: HashMap<u32, HashSet<u32>> = HashMap::new();

        for (&typedef_id, &struct_id) in &rewritten {
            let Some(parents) = inverse.get(&typedef_id) else {
                continue;
            };

            if !child_sets.contains_key(&struct_id) {
                let children = self.collect_children(struct_id);
                child_sets.insert(struct_id, children);
            }
            let children = &child_sets[&struct_id];

            for &parent in parents {
                if parent == struct_id || children.contains(&parent) {
                    continue;
                }
                if let Some(parent_deps) = self.deps.get_mut(&parent) {
                    parent_deps.insert(struct_id, false);
                }
            }
        }

        Ok(())
    }

    fn inverse_dep_tree(&self) -> BTreeMap<u32, BTreeSet<u32>> {
        let mut inverse: BTreeMap<u32, BTreeSet<u32>> = BTreeMap::new();
        for (&parent, children) in &self.deps {
            for &child in children.keys() {
                inverse.entry(child).or_default().insert(parent);
            }
        }
        inverse
    }

    /// Transitive closure of a node's forward links, the node included.
    fn collect_children(&self, start: u32) -> HashSet<u32> {
        let mut visited = HashSet::new();
        let mut pending = vec![start];

        while let Some(id) = pending.pop() {
            if !visited.insert(id) {
                continue;
            }
            if let Some(children) = self.deps.get(&id) {
                pending.extend(children.keys().copied());
            }
        }
        visited
    }

    /// Depth-first emission order: strong links are visited first, weak
    /// links are satisfied by enqueueing the target's forward declaration.
    fn build_queue(&mut self) -> Result<()> {
        self.queue.clear();
        let mut visited: HashSet<u32> = HashSet::from([0]);

        let top: Vec<u32> = self.top_level.iter().copied().collect();
        for id in top {
            self.enqueue(&mut visited, id)?;
        }
        Ok(())
    }

    fn enqueue(&mut self, visited: &mut HashSet<u32>, id: u32) -> Result<()> {
        if id == 0 || !visited.insert(id) {
            return Ok(());
        }

        let links: Vec<(u32, bool)> = self
            .deps
            .get(&id)
            .map(|links| links.iter().map(|(&child, &weak)| (child, weak)).collect())
            .unwrap_or_default();

        for (child, weak) in links {
            if weak {
                let is_union = match self.types.get(&child).map(BtfType::kind) {
                    Some(BtfKind::Union) => true,
                    Some(BtfKind::Struct) => false,
                    _ => bail!("weak link to BTF type #{child} which is not an aggregate"),
                };
                let name = self
                    .type_name(child)
                    .with_context(|| format!("aggregate #{child} has no name"))?;
                let fwd_id = self.get_or_create_fwd(is_union, &name);
                self.enqueue(visited, fwd_id)?;
            } else {
                self.enqueue(visited, child)?;
            }
        }

        self.queue.push(id);
        Ok(())
    }
}

fn namespace_key(tagged: bool, name: &str) -> String {
    if tagged {
        format!("tag-{name}")
    } else {
        name.to_string()
    }
}
