//! Static registry of value type descriptors.
//!
//! Built once from the host's reflection metadata and cross-checked against
//! the host's real layout. After the build the catalog is immutable and
//! shared read-only by every compilation.

use std::fmt;
use std::sync::{Arc, OnceLock};

use kiln_runtime::{
    host_metadata, HostKind, HostMetadata, HostTypeId, HostTypeInfo, LayoutProbe, RuntimeLayout,
    ScalarKind, Tag,
};

use crate::error::CompileError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// A machine scalar that fits a register.
    Native,
    /// Flat fixed-layout struct embedded in the boxed data union.
    Composite,
    /// Only reachable through the boxed path.
    Opaque,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Category::Native => "native",
            Category::Composite => "composite",
            Category::Opaque => "opaque",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub ty: HostTypeId,
    pub offset: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    pub id: HostTypeId,
    pub name: String,
    pub category: Category,
    pub size: u32,
    pub align: u32,
    /// Dynamic tag; `None` for types with no standalone boxed form.
    pub tag: Option<Tag>,
    pub scalar: Option<ScalarKind>,
    pub fields: Vec<FieldDescriptor>,
    /// Registered as opaque because the host published no field offsets.
    pub degraded: bool,
}

impl TypeDescriptor {
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|field| field.name == name)
    }
}

#[derive(Debug)]
pub struct TypeCatalog {
    types: Vec<Option<TypeDescriptor>>,
    by_tag: Vec<Option<HostTypeId>>,
}

static GLOBAL: OnceLock<Result<Arc<TypeCatalog>, CompileError>> = OnceLock::new();

impl TypeCatalog {
    /// The process-wide catalog built from the host runtime's own metadata.
    pub fn global() -> Result<Arc<TypeCatalog>, CompileError> {
        GLOBAL
            .get_or_init(|| TypeCatalog::build(&host_metadata(), &RuntimeLayout).map(Arc::new))
            .clone()
    }

    pub fn build(metadata: &HostMetadata, probe: &dyn LayoutProbe) -> Result<Self, CompileError> {
        let capacity = metadata
            .types
            .iter()
            .map(|info| info.id.index() + 1)
            .max()
            .unwrap_or(0);
        let mut types: Vec<Option<TypeDescriptor>> = vec![None; capacity];
        let mut by_tag = vec![None; Tag::ALL.len()];

        for info in &metadata.types {
            let descriptor = describe_host_type(metadata, probe, info)?;
            if let Some(tag) = descriptor.tag {
                by_tag[tag.raw() as usize] = Some(descriptor.id);
            }
            let slot = &mut types[info.id.index()];
            if slot.is_some() {
                return Err(CompileError::AbiLayoutMismatch {
                    ty: info.name.clone(),
                    detail: format!("type id {} published twice", info.id),
                });
            }
            *slot = Some(descriptor);
        }

        tracing::debug!(types = metadata.types.len(), "type catalog built");
        Ok(Self { types, by_tag })
    }

    pub fn describe(&self, id: HostTypeId) -> Result<&TypeDescriptor, CompileError> {
        self.types
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or(CompileError::UnknownType(id))
    }

    /// The tagged scalar a narrow field scalar widens to.
    pub fn canonical(&self, id: HostTypeId) -> Result<&TypeDescriptor, CompileError> {
        let descriptor = self.describe(id)?;
        match (descriptor.tag, descriptor.scalar) {
            (None, Some(ScalarKind::Int32)) => self.by_tag(Tag::Int),
            (None, Some(ScalarKind::Float32)) => self.by_tag(Tag::Float),
            _ => Ok(descriptor),
        }
    }

    pub fn field(
        &self,
        owner: HostTypeId,
        name: &str,
    ) -> Result<(&FieldDescriptor, &TypeDescriptor), CompileError> {
        let descriptor = self.describe(owner)?;
        if descriptor.degraded {
            return Err(CompileError::MissingFieldOffsetMetadata {
                ty: descriptor.name.clone(),
                field: name.to_string(),
            });
        }
        let field = descriptor.field(name).ok_or_else(|| CompileError::UnknownField {
            ty: descriptor.name.clone(),
            field: name.to_string(),
        })?;
        Ok((field, self.describe(field.ty)?))
    }

    pub fn by_tag(&self, tag: Tag) -> Result<&TypeDescriptor, CompileError> {
        let id = self.by_tag[tag.raw() as usize].ok_or(CompileError::UnknownType(HostTypeId(tag.raw())))?;
        self.describe(id)
    }

    /// Scalar leaves of a composite, flattened through nested composites,
    /// with offsets relative to the composite's start.
    pub fn leaves(&self, id: HostTypeId) -> Result<Vec<(u32, ScalarKind)>, CompileError> {
        let mut out = Vec::new();
        self.collect_leaves(id, 0, &mut out)?;
        Ok(out)
    }

    fn collect_leaves(
        &self,
        id: HostTypeId,
        base: u32,
        out: &mut Vec<(u32, ScalarKind)>,
    ) -> Result<(), CompileError> {
        let descriptor = self.describe(id)?;
        if let Some(kind) = descriptor.scalar {
            out.push((base, kind));
            return Ok(());
        }
        for field in &descriptor.fields {
            self.collect_leaves(field.ty, base + field.offset, out)?;
        }
        Ok(())
    }

    /// True when every field of the composite is a scalar.
    pub fn is_flat(&self, id: HostTypeId) -> bool {
        self.describe(id).is_ok_and(|descriptor| {
            descriptor.category == Category::Composite
                && descriptor
                    .fields
                    .iter()
                    .all(|field| self.describe(field.ty).is_ok_and(|ty| ty.scalar.is_some()))
        })
    }

    pub fn len(&self) -> usize {
        self.types.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn layout_mismatch(info: &HostTypeInfo, detail: String) -> CompileError {
    CompileError::AbiLayoutMismatch {
        ty: info.name.clone(),
        detail,
    }
}

fn describe_host_type(
    metadata: &HostMetadata,
    probe: &dyn LayoutProbe,
    info: &HostTypeInfo,
) -> Result<TypeDescriptor, CompileError> {
    let mut descriptor = TypeDescriptor {
        id: info.id,
        name: info.name.clone(),
        category: Category::Opaque,
        size: info.size as u32,
        align: info.align as u32,
        tag: info.tag,
        scalar: None,
        fields: Vec::new(),
        degraded: false,
    };

    match &info.kind {
        HostKind::Scalar(kind) => {
            descriptor.category = Category::Native;
            descriptor.scalar = Some(*kind);
        }
        HostKind::Handle => {}
        HostKind::Struct { fields: None } => {
            tracing::debug!(ty = %info.name, "no field offsets published, registering as opaque");
            descriptor.degraded = true;
        }
        HostKind::Struct {
            fields: Some(fields),
        } => {
            if info.size > probe.data_size() {
                return Err(layout_mismatch(
                    info,
                    format!("{} bytes do not fit the {} byte data union", info.size, probe.data_size()),
                ));
            }
            for field in fields {
                let field_info = metadata
                    .types
                    .iter()
                    .find(|candidate| candidate.id == field.ty)
                    .ok_or(CompileError::UnknownType(field.ty))?;
                let probed = probe.field_offset(info.id, &field.name);
                if probed != Some(field.offset) {
                    return Err(layout_mismatch(
                        info,
                        format!(
                            "field `{}` recorded at {}, host layout has {:?}",
                            field.name, field.offset, probed
                        ),
                    ));
                }
                if field_info.align == 0 || field.offset % field_info.align != 0 {
                    return Err(layout_mismatch(
                        info,
                        format!("field `{}` at {} is misaligned", field.name, field.offset),
                    ));
                }
                if field.offset + field_info.size > info.size.min(probe.data_size()) {
                    return Err(layout_mismatch(
                        info,
                        format!("field `{}` overlaps the end of the data union", field.name),
                    ));
                }
                descriptor.fields.push(FieldDescriptor {
                    name: field.name.clone(),
                    ty: field.ty,
                    offset: field.offset as u32,
                });
            }
            descriptor.category = Category::Composite;
        }
    }
    Ok(descriptor)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use kiln_runtime::HostField;

    struct SkewedProbe;

    impl LayoutProbe for SkewedProbe {
        fn field_offset(&self, ty: HostTypeId, field: &str) -> Option<usize> {
            match (ty, field) {
                (HostTypeId::VECTOR2, "y") => Some(8),
                _ => RuntimeLayout.field_offset(ty, field),
            }
        }

        fn data_size(&self) -> usize {
            RuntimeLayout.data_size()
        }
    }

    #[test]
    fn classifies_host_types() {
        let catalog = TypeCatalog::global().unwrap();
        assert_eq!(catalog.describe(HostTypeId::INT).unwrap().category, Category::Native);
        assert_eq!(catalog.describe(HostTypeId::VECTOR2).unwrap().category, Category::Composite);
        assert_eq!(catalog.describe(HostTypeId::STRING).unwrap().category, Category::Opaque);
        assert_eq!(catalog.describe(HostTypeId::VARIANT).unwrap().tag, None);
    }

    #[test]
    fn unknown_ids_fail() {
        let catalog = TypeCatalog::global().unwrap();
        assert_eq!(
            catalog.describe(HostTypeId(400)).unwrap_err(),
            CompileError::UnknownType(HostTypeId(400))
        );
    }

    #[test]
    fn narrow_scalars_widen_to_tagged_ones() {
        let catalog = TypeCatalog::global().unwrap();
        assert_eq!(catalog.canonical(HostTypeId::FLOAT32).unwrap().id, HostTypeId::FLOAT);
        assert_eq!(catalog.canonical(HostTypeId::INT32).unwrap().id, HostTypeId::INT);
        assert_eq!(catalog.canonical(HostTypeId::VECTOR3).unwrap().id, HostTypeId::VECTOR3);
    }

    #[test]
    fn field_lookup_reports_offsets() {
        let catalog = TypeCatalog::global().unwrap();
        let (field, ty) = catalog.field(HostTypeId::RECT2, "size").unwrap();
        assert_eq!(field.offset, 8);
        assert_eq!(ty.id, HostTypeId::VECTOR2);
        assert!(matches!(
            catalog.field(HostTypeId::VECTOR2, "z"),
            Err(CompileError::UnknownField { .. })
        ));
    }

    #[test]
    fn basis_degrades_to_opaque() {
        let catalog = TypeCatalog::global().unwrap();
        let basis = catalog.describe(HostTypeId::BASIS).unwrap();
        assert_eq!(basis.category, Category::Opaque);
        assert!(basis.degraded);
        assert!(matches!(
            catalog.field(HostTypeId::BASIS, "rows"),
            Err(CompileError::MissingFieldOffsetMetadata { .. })
        ));
    }

    #[test]
    fn rect_leaves_are_flattened() {
        let catalog = TypeCatalog::global().unwrap();
        let leaves = catalog.leaves(HostTypeId::RECT2).unwrap();
        let offsets: Vec<u32> = leaves.iter().map(|(offset, _)| *offset).collect();
        assert_eq!(offsets, vec![0, 4, 8, 12]);
        assert!(!catalog.is_flat(HostTypeId::RECT2));
        assert!(catalog.is_flat(HostTypeId::VECTOR2I));
    }

    #[test]
    fn skewed_offsets_are_fatal() {
        let err = TypeCatalog::build(&host_metadata(), &SkewedProbe).unwrap_err();
        assert!(matches!(err, CompileError::AbiLayoutMismatch { ref ty, .. } if ty == "Vector2"));
        assert_eq!(err.recovery(), crate::Recovery::Fatal);
    }

    #[test]
    fn fields_past_the_union_are_fatal() {
        let mut metadata = host_metadata();
        let vector3 = &mut metadata.types[HostTypeId::VECTOR3.index()];
        if let HostKind::Struct { fields: Some(fields) } = &mut vector3.kind {
            fields.push(HostField {
                name: "w".into(),
                ty: HostTypeId::FLOAT32,
                offset: 24,
            });
        }
        struct Permissive;
        impl LayoutProbe for Permissive {
            fn field_offset(&self, ty: HostTypeId, field: &str) -> Option<usize> {
                if field == "w" { Some(24) } else { RuntimeLayout.field_offset(ty, field) }
            }
            fn data_size(&self) -> usize {
                24
            }
        }
        let err = TypeCatalog::build(&metadata, &Permissive).unwrap_err();
        assert!(matches!(err, CompileError::AbiLayoutMismatch { .. }));
    }
}
