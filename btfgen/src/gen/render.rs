//! Declarator rendering.
//!
//! Descending through pointer/qualifier/array wrappers accumulates their ids
//! on a modifier list; at the base type the list is serialized in three
//! passes around the identifier: qualifiers on the left, the pointer chain
//! in the middle, array suffixes on the right. Whatever cannot be consumed
//! legally ends up in an `/* Unused modifiers: … */` comment instead of
//! invalid C.

use std::fmt::Write as _;

use anyhow::Context as _;
use anyhow::Result;

use btfparse::BtfComposite;
use btfparse::BtfEnum;
use btfparse::BtfFuncProto;
use btfparse::BtfFwd;
use btfparse::BtfFwdKind;
use btfparse::BtfKind;
use btfparse::BtfType;
use btfparse::BtfTypedef;

use super::GenCtx;

pub(super) struct Renderer<'g> {
    ctx: &'g GenCtx,
    out: String,
    modifiers: Vec<u32>,
    modifier_stack: Vec<Vec<u32>>,
    variable_name: Option<String>,
    variable_stack: Vec<Option<String>>,
    typedef_name: Option<String>,
    typedef_stack: Vec<Option<String>>,
    indent: usize,
}

impl<'g> Renderer<'g> {
    pub fn new(ctx: &'g GenCtx) -> Self {
        Self {
            ctx,
            out: String::new(),
            modifiers: Vec::new(),
            modifier_stack: Vec::new(),
            variable_name: None,
            variable_stack: Vec::new(),
            typedef_name: None,
            typedef_stack: Vec::new(),
            indent: 0,
        }
    }

    pub fn render(mut self, queue: &[u32]) -> Result<String> {
        self.out.push_str("#pragma pack(push, 1)\n");

        for &id in queue {
            self.reset_state();

            if let Some(name) = self.ctx.type_name(id) {
                // Compiler-internal types cannot be redeclared.
                if name.starts_with("__builtin_") {
                    continue;
                }
            }

            self.emit_type(id, true)?;
            self.out.push_str(";\n\n");
        }

        self.out.push_str("#pragma pack(pop)\n");
        Ok(self.out)
    }

    fn reset_state(&mut self) {
        self.modifiers.clear();
        self.modifier_stack.clear();
        self.variable_name = None;
        self.variable_stack.clear();
        self.typedef_name = None;
        self.typedef_stack.clear();
    }

    fn push_state(&mut self) {
        self.variable_stack.push(self.variable_name.take());
        self.modifier_stack.push(std::mem::take(&mut self.modifiers));
        self.typedef_stack.push(self.typedef_name.take());
    }

    fn pop_state(&mut self) {
        self.variable_name = self.variable_stack.pop().flatten();
        self.modifiers = self.modifier_stack.pop().unwrap_or_default();
        self.typedef_name = self.typedef_stack.pop().flatten();
    }

    /// The identifier the declaration being rendered is for: a member or
    /// parameter name, or the typedef name when nested under `typedef`.
    fn take_declared_name(&mut self) -> Option<String> {
        self.variable_name.take().or_else(|| self.typedef_name.take())
    }

    fn write_indent(&mut self) {
        for _ in 0..self.indent {
            self.out.push_str("  ");
        }
    }

    fn type_header(&mut self, id: u32) -> Result<()> {
        self.write_indent();
        writeln!(self.out, "/* BTF Type #{id} */")?;
        Ok(())
    }

    fn emit_type(&mut self, id: u32, as_def: bool) -> Result<()> {
        if id == 0 {
            return self.emit_base_name(0, "void");
        }

        let ctx = self.ctx;
        let ty = ctx
            .type_by_id(id)
            .with_context(|| format!("unknown BTF type #{id}"))?;

        match ty {
            BtfType::Struct(t) => self.emit_composite(id, t, false, as_def),
            BtfType::Union(t) => self.emit_composite(id, t, true, as_def),
            BtfType::Enum(t) => self.emit_enum(id, t, as_def),
            BtfType::Typedef(t) => self.emit_typedef(id, t, as_def),
            BtfType::Int(t) => self.emit_base_name(id, &t.name),
            BtfType::Float(t) => self.emit_base_name(id, &t.name),
            BtfType::FuncProto(t) => self.emit_func_proto(id, t),
            BtfType::Fwd(t) => self.emit_fwd(id, t),
            BtfType::Ptr(t) => {
                self.modifiers.push(id);
                self.emit_type(t.type_id, as_def)
            }
            BtfType::Array(t) => {
                self.modifiers.push(id);
                self.emit_type(t.val_type_id, as_def)
            }
            BtfType::Volatile(t) => {
                self.modifiers.push(id);
                self.emit_type(t.type_id, as_def)
            }
            BtfType::Const(t) => {
                self.modifiers.push(id);
                self.emit_type(t.type_id, as_def)
            }
            BtfType::Restrict(t) => {
                self.modifiers.push(id);
                self.emit_type(t.type_id, as_def)
            }
            // Never part of a declaration.
            BtfType::Func(_) | BtfType::Var(_) | BtfType::DataSec(_) | BtfType::Void => Ok(()),
        }
    }

    /// Int, float, void and typedef references all render as a plain base
    /// type name surrounded by the modifier passes.
    fn emit_base_name(&mut self, id: u32, name: &str) -> Result<()> {
        self.type_header(id)?;
        self.write_indent();
        self.left_modifiers()?;
        self.out.push_str(name);
        self.middle_modifiers()?;
        if let Some(declared) = self.take_declared_name() {
            write!(self.out, " {declared}")?;
        }
        self.right_modifiers()?;
        Ok(())
    }

    fn emit_composite(
        &mut self,
        id: u32,
        t: &BtfComposite,
        is_union: bool,
        as_def: bool,
    ) -> Result<()> {
        self.type_header(id)?;
        self.write_indent();
        self.left_modifiers()?;
        self.out.push_str(if is_union { "union" } else { "struct" });

        if let Some(tag) = t.name.as_deref().filter(|name| !name.is_empty()) {
            write!(self.out, " {tag}")?;
        }

        // The body appears when defining at top level and inline for
        // anonymous aggregates.
        let emit_body = as_def || t.name.is_none();
        if emit_body {
            self.push_state();
            self.out.push_str(" {\n");
            self.indent += 1;

            for member in &t.members {
                if let Some(name) = &member.name {
                    self.variable_name = Some(name.clone());
                }
                self.emit_type(member.type_id, false)?;
                if let Some(bits) = member.bitfield_size.filter(|&bits| bits != 0) {
                    write!(self.out, " : {bits}")?;
                }
                self.out.push_str(";\n");
            }

            self.indent -= 1;
            self.write_indent();
            self.out.push('}');
            self.pop_state();
        }

        self.middle_modifiers()?;
        if let Some(declared) = self.take_declared_name() {
            write!(self.out, " {declared}")?;
        }
        self.right_modifiers()?;
        Ok(())
    }

    fn emit_enum(&mut self, id: u32, t: &BtfEnum, as_def: bool) -> Result<()> {
        self.type_header(id)?;
        self.write_indent();
        self.left_modifiers()?;
        self.out.push_str("enum");

        if let Some(name) = &t.name {
            write!(self.out, " {name}")?;
        }

        let emit_body = (as_def && !t.values.is_empty()) || (!as_def && t.name.is_none());
        if emit_body {
            self.out.push_str(" {\n");
            self.indent += 1;

            for (index, value) in t.values.iter().enumerate() {
                self.write_indent();
                write!(self.out, "{} = {}", value.name, value.value)?;
                if index + 1 != t.values.len() {
                    self.out.push(',');
                }
                self.out.push('\n');
            }

            self.indent -= 1;
            self.write_indent();
            self.out.push('}');
        }

        self.middle_modifiers()?;
        if let Some(declared) = self.take_declared_name() {
            write!(self.out, " {declared}")?;
        }
        self.right_modifiers()?;
        Ok(())
    }

    fn emit_typedef(&mut self, id: u32, t: &BtfTypedef, as_def: bool) -> Result<()> {
        if !as_def {
            return self.emit_base_name(id, &t.name);
        }

        self.type_header(id)?;
        self.out.push_str("typedef\n");
        self.indent += 1;

        self.typedef_name = Some(t.name.clone());
        self.emit_type(t.type_id, false)?;
        if let Some(name) = self.typedef_name.take() {
            write!(self.out, " {name}")?;
        }

        self.indent -= 1;
        Ok(())
    }

    fn emit_fwd(&mut self, id: u32, t: &BtfFwd) -> Result<()> {
        self.type_header(id)?;
        self.write_indent();
        self.left_modifiers()?;
        self.out.push_str(match t.kind {
            BtfFwdKind::Struct => "struct",
            BtfFwdKind::Union => "union",
        });
        write!(self.out, " {}", t.name)?;
        self.middle_modifiers()?;
        if let Some(declared) = self.take_declared_name() {
            write!(self.out, " {declared}")?;
        }
        self.right_modifiers()?;
        Ok(())
    }

    fn emit_func_proto(&mut self, id: u32, t: &BtfFuncProto) -> Result<()> {
        self.filter_proto_modifiers();
        self.type_header(id)?;
        self.indent += 1;

        self.push_state();
        self.emit_type(t.ret_type_id, false)?;
        self.pop_state();

        self.indent += 1;
        self.write_indent();
        self.out.push('\n');
        self.write_indent();
        self.out.push('(');

        self.left_modifiers()?;
        self.middle_modifiers()?;
        if let Some(declared) = self.take_declared_name() {
            write!(self.out, " {declared}")?;
        }
        self.right_modifiers()?;

        self.out.push_str(")(\n");
        self.indent += 1;

        self.push_state();
        for (index, param) in t.params.iter().enumerate() {
            self.emit_type(param.type_id, false)?;
            let last = index + 1 == t.params.len();
            if !last || t.is_variadic {
                self.out.push(',');
            }
            self.out.push('\n');
        }
        self.pop_state();

        if t.is_variadic {
            self.write_indent();
            self.out.push_str("...\n");
        }

        self.indent -= 1;
        self.write_indent();
        self.out.push(')');

        self.indent -= 1;
        self.indent -= 1;
        Ok(())
    }

    /// Volatile on a function return type only draws warnings; drop it.
    fn filter_proto_modifiers(&mut self) {
        let ctx = self.ctx;
        self.modifiers
            .retain(|id| ctx.type_by_id(*id).map(BtfType::kind) != Some(BtfKind::Volatile));
    }

    /// Qualifiers adjacent to the base type, printed before it.
    fn left_modifiers(&mut self) -> Result<()> {
        let mut words = Vec::new();
        for &id in self.modifiers.iter().rev() {
            match self.ctx.type_by_id(id).map(BtfType::kind) {
                Some(BtfKind::Volatile) => words.push("volatile"),
                Some(BtfKind::Const) => words.push("const"),
                Some(BtfKind::Restrict) => words.push("restrict"),
                _ => break,
            }
        }

        let kept = self.modifiers.len() - words.len();
        self.modifiers.truncate(kept);

        if !words.is_empty() {
            self.out.push(' ');
        }
        for word in &words {
            write!(self.out, "{word} ")?;
        }
        Ok(())
    }

    /// The pointer chain between the base type and the identifier.
    fn middle_modifiers(&mut self) -> Result<()> {
        let mut words = Vec::new();
        for &id in self.modifiers.iter().rev() {
            match self.ctx.type_by_id(id).map(BtfType::kind) {
                Some(BtfKind::Const) => words.push("const"),
                Some(BtfKind::Ptr) => words.push("*"),
                _ => break,
            }
        }

        let kept = self.modifiers.len() - words.len();
        self.modifiers.truncate(kept);

        if !words.is_empty() {
            self.out.push(' ');
        }
        for (index, word) in words.iter().enumerate() {
            self.out.push_str(word);
            if index + 1 != words.len() {
                self.out.push(' ');
            }
        }
        Ok(())
    }

    /// Array suffixes after the identifier, innermost first. A qualifier
    /// squeezed against an array has no valid spelling there and is
    /// swallowed rather than emitted as `int const[10]`.
    fn right_modifiers(&mut self) -> Result<()> {
        let ctx = self.ctx;
        let mut consumed = 0;
        let mut is_array = false;

        for &id in self.modifiers.iter().rev() {
            match ctx.type_by_id(id) {
                Some(BtfType::Array(t)) => {
                    is_array = true;
                    write!(self.out, "[{}]", t.nelems)?;
                    consumed += 1;
                }
                Some(ty)
                    if is_array && matches!(ty.kind(), BtfKind::Const | BtfKind::Volatile) =>
                {
                    consumed += 1;
                }
                _ => break,
            }
        }

        let kept = self.modifiers.len() - consumed;
        self.modifiers.truncate(kept);

        if !self.modifiers.is_empty() {
            self.out.push_str(" /* Unused modifiers: ");
            for (index, id) in self.modifiers.iter().enumerate() {
                write!(self.out, "{id}")?;
                if index + 1 != self.modifiers.len() {
                    self.out.push_str(", ");
                }
            }
            self.out.push_str(" */ ");
            self.modifiers.clear();
        }
        Ok(())
    }
}
