//! Frozen type table built by type inference.

use log::trace;
use rustc_hash::{FxHashMap, FxHashSet};
use tml_ast::{PrimTy, Ty};
use tml_intern::{Interner, Symbol};

use crate::{COPY_BEHAVIOR, DROP_BEHAVIOR, TypeEnv, builtins::is_owning_builtin};

/// One field of a struct layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLayout {
    /// Field name
    pub name: Symbol,
    /// Declared field type
    pub ty: Ty,
}

/// A user-declared aggregate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeDef {
    /// Struct with named fields
    Struct {
        /// Fields in declaration order
        fields: Vec<FieldLayout>,
    },
    /// Enum with positional variant payloads
    Enum {
        /// Variants in declaration order
        variants: Vec<(Symbol, Vec<Ty>)>,
    },
}

/// Mutable builder filled in by type inference before checking starts.
#[derive(Debug)]
pub struct TypeTableBuilder {
    interner: Interner,
    defs: FxHashMap<Symbol, TypeDef>,
    aliases: FxHashMap<Symbol, Ty>,
    behaviors: FxHashMap<Symbol, FxHashSet<Symbol>>,
}

impl TypeTableBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new(interner: &Interner) -> Self {
        Self {
            interner: interner.clone(),
            defs: FxHashMap::default(),
            aliases: FxHashMap::default(),
            behaviors: FxHashMap::default(),
        }
    }

    /// Declares a struct.
    pub fn add_struct(&mut self, name: &str, fields: Vec<(&str, Ty)>) -> &mut Self {
        let fields = fields
            .into_iter()
            .map(|(field, ty)| FieldLayout {
                name: self.interner.intern(field),
                ty,
            })
            .collect();
        self.defs
            .insert(self.interner.intern(name), TypeDef::Struct { fields });
        self
    }

    /// Declares an enum.
    pub fn add_enum(&mut self, name: &str, variants: Vec<(&str, Vec<Ty>)>) -> &mut Self {
        let variants = variants
            .into_iter()
            .map(|(variant, payload)| (self.interner.intern(variant), payload))
            .collect();
        self.defs
            .insert(self.interner.intern(name), TypeDef::Enum { variants });
        self
    }

    /// Declares `type name = target`.
    pub fn add_alias(&mut self, name: &str, target: Ty) -> &mut Self {
        self.aliases.insert(self.interner.intern(name), target);
        self
    }

    /// Records that `type_name` implements `behavior`.
    pub fn implement(&mut self, type_name: &str, behavior: &str) -> &mut Self {
        let behavior = self.interner.intern(behavior);
        self.behaviors
            .entry(self.interner.intern(type_name))
            .or_default()
            .insert(behavior);
        self
    }

    /// Freezes the table. No further mutation is possible.
    #[must_use]
    pub fn build(self) -> TypeTable {
        TypeTable {
            interner: self.interner,
            defs: self.defs,
            aliases: self.aliases,
            behaviors: self.behaviors,
        }
    }
}

/// Immutable type table shared by all checker threads.
#[derive(Debug)]
pub struct TypeTable {
    interner: Interner,
    defs: FxHashMap<Symbol, TypeDef>,
    aliases: FxHashMap<Symbol, Ty>,
    behaviors: FxHashMap<Symbol, FxHashSet<Symbol>>,
}

impl TypeTable {
    /// Looks up a user-declared aggregate.
    #[must_use]
    pub fn def(&self, name: Symbol) -> Option<&TypeDef> {
        self.defs.get(&name)
    }

    /// Chases alias chains until a non-alias type is reached.
    ///
    /// Resolution is iterative and remembers every alias it has expanded. If
    /// an alias is reached twice the chain is cyclic, and the input is returned
    /// unchanged.
    #[must_use]
    pub fn resolve_alias(&self, ty: &Ty) -> Ty {
        let mut visited = FxHashSet::default();
        let mut current = ty;
        while let Ty::Named { name, args } = current {
            if !args.is_empty() {
                break;
            }
            let Some(target) = self.aliases.get(name) else {
                break;
            };
            if !visited.insert(*name) {
                trace!("alias cycle through {}", self.interner.resolve(name));
                return ty.clone();
            }
            current = target;
        }
        current.clone()
    }

    /// Resolves aliases and maps primitive names onto [`Ty::Primitive`].
    #[must_use]
    pub fn normalize(&self, ty: &Ty) -> Ty {
        let resolved = self.resolve_alias(ty);
        if let Ty::Named { name, args } = &resolved {
            if args.is_empty() {
                if let Some(prim) = self
                    .interner
                    .try_resolve(name)
                    .and_then(|text| PrimTy::from_name(&text))
                {
                    return Ty::Primitive(prim);
                }
            }
        }
        resolved
    }

    fn has_behavior(&self, name: Symbol, behavior: &str) -> bool {
        self.interner.get(behavior).is_some_and(|behavior| {
            self.behaviors
                .get(&name)
                .is_some_and(|impls| impls.contains(&behavior))
        })
    }

    fn named_is_owning(&self, name: Symbol) -> bool {
        self.interner
            .try_resolve(&name)
            .is_some_and(|text| is_owning_builtin(&text))
    }
}

impl TypeEnv for TypeTable {
    fn is_copy_type(&self, ty: &Ty) -> bool {
        match self.normalize(ty) {
            Ty::Primitive(prim) => prim.is_copy(),
            Ty::Ref { .. } | Ty::Func { .. } | Ty::Unknown => true,
            Ty::Tuple(elems) => elems.iter().all(|elem| self.is_copy_type(elem)),
            Ty::Array { elem, .. } => self.is_copy_type(&elem),
            Ty::Named { name, .. } => {
                !self.named_is_owning(name) && self.has_behavior(name, COPY_BEHAVIOR)
            }
        }
    }

    fn type_needs_drop(&self, ty: &Ty) -> bool {
        // Worklist over named types so recursive aggregates terminate
        let mut visited = FxHashSet::default();
        let mut pending = vec![self.normalize(ty)];
        while let Some(next) = pending.pop() {
            match next {
                Ty::Primitive(prim) => {
                    if prim == PrimTy::Str {
                        return true;
                    }
                }
                Ty::Ref { .. } | Ty::Func { .. } | Ty::Unknown => {}
                Ty::Tuple(elems) => pending.extend(elems.iter().map(|elem| self.normalize(elem))),
                Ty::Array { elem, .. } => pending.push(self.normalize(&elem)),
                Ty::Named { name, .. } => {
                    if self.named_is_owning(name) || self.has_behavior(name, DROP_BEHAVIOR) {
                        return true;
                    }
                    if !visited.insert(name) {
                        continue;
                    }
                    match self.defs.get(&name) {
                        Some(TypeDef::Struct { fields }) => {
                            pending.extend(fields.iter().map(|field| self.normalize(&field.ty)));
                        }
                        Some(TypeDef::Enum { variants }) => pending.extend(
                            variants
                                .iter()
                                .flat_map(|(_, payload)| payload.iter().map(|ty| self.normalize(ty))),
                        ),
                        None => {}
                    }
                }
            }
        }
        false
    }

    fn field_type(&self, ty: &Ty, field: Symbol) -> Option<Ty> {
        self.struct_fields(ty)?
            .iter()
            .find(|layout| layout.name == field)
            .map(|layout| layout.ty.clone())
    }

    fn struct_fields(&self, ty: &Ty) -> Option<&[FieldLayout]> {
        let Ty::Named { name, .. } = self.resolve_alias(ty) else {
            return None;
        };
        match self.defs.get(&name)? {
            TypeDef::Struct { fields } => Some(fields.as_slice()),
            TypeDef::Enum { .. } => None,
        }
    }

    fn implements_behavior(&self, ty: &Ty, behavior: &str) -> bool {
        match self.resolve_alias(ty) {
            Ty::Named { name, .. } => self.has_behavior(name, behavior),
            _ => false,
        }
    }
}
