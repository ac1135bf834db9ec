//! Loader output: everything a chunk needs from disk, built off the main
//! thread and handed over by value.

use std::sync::Arc;

use chunkspace_common::{BoundingBox, is_outside_identifier};
use chunkspace_format::ChunkDoc;
use glam::{Affine3A, Vec3};

use crate::arena::ChunkId;
use crate::boundary::Boundary;
use crate::chunk::{outside_local_bb, outside_transform};
use crate::error::LoadError;
use crate::mapping::{DirMapping, guess_chunk};

/// Minimum number of boundary planes a well formed chunk has.
const MIN_BOUNDARIES: usize = 4;

/// Parsed contents of one chunk document.
#[derive(Debug)]
pub struct ChunkBody {
    pub identifier: String,
    pub transform: Affine3A,
    pub local_bb: BoundingBox,
    pub boundaries: Vec<Boundary>,
    pub shell_resource: Option<String>,
    /// False when the document was missing or partly unusable.
    pub good: bool,
}

impl ChunkBody {
    /// Build the body of `identifier` from its document. `mappings` are the
    /// live mappings of the space, used to resolve extern portals.
    pub fn from_doc(
        identifier: &str,
        mapping: &Arc<DirMapping>,
        mappings: &[Arc<DirMapping>],
        doc: Option<&ChunkDoc>,
    ) -> Self {
        let is_outside = is_outside_identifier(identifier);
        let mut body = Self {
            identifier: identifier.to_string(),
            transform: *mapping.mapper(),
            local_bb: BoundingBox::unit(),
            boundaries: Vec::new(),
            shell_resource: None,
            good: true,
        };

        if is_outside {
            body.local_bb = outside_local_bb();
            match outside_transform(identifier, mapping) {
                Some(t) => body.transform = t,
                None => {
                    tracing::error!(chunk = identifier, "cannot decode grid position");
                    body.good = false;
                }
            }
        }

        let Some(doc) = doc else {
            tracing::warn!(chunk = identifier, path = mapping.path(), "chunk document not found");
            body.good = false;
            return body;
        };

        if !is_outside {
            let local = doc.transform.map(|t| t.to_affine()).unwrap_or(Affine3A::IDENTITY);
            body.transform = *mapping.mapper() * local;
            let shell_bb = doc
                .shell
                .as_ref()
                .and_then(|s| s.bounding_box.filter(|bb| !bb.is_empty()));
            match shell_bb {
                Some(bb) => {
                    body.local_bb = bb;
                    body.shell_resource = doc.shell.as_ref().map(|s| s.resource.clone());
                }
                None => {
                    tracing::error!(chunk = identifier, "failed to load shell; using unit bounds");
                    body.good = false;
                    return body;
                }
            }
        }

        for bdoc in &doc.boundaries {
            match Boundary::from_doc(bdoc, mapping) {
                Some(b) => body.boundaries.push(b),
                None => body.good = false,
            }
        }
        if doc.boundaries.len() < MIN_BOUNDARIES {
            tracing::error!(
                chunk = identifier,
                count = doc.boundaries.len(),
                "too few boundaries"
            );
            body.good = false;
        }

        let transform = body.transform;
        for b in &mut body.boundaries {
            for p in b.bound_portals.iter_mut().chain(b.unbound_portals.iter_mut()) {
                p.update_centre(&transform);
            }
        }
        body.resolve_externs(mapping, mappings);
        body
    }

    /// Give back the refs that stubs into other mappings hold.
    pub(crate) fn release_foreign_stubs(&mut self, own: &DirMapping) {
        for b in &mut self.boundaries {
            for p in b.unbound_portals.iter_mut().chain(b.bound_portals.iter_mut()) {
                if let Some(stub) = p.stub.take() {
                    if stub.mapping.id() != own.id() {
                        stub.mapping.dec_ref();
                    }
                }
            }
        }
    }

    /// Point extern portals at a stub in whichever other mapping holds the
    /// space just beyond them.
    fn resolve_externs(&mut self, mapping: &Arc<DirMapping>, mappings: &[Arc<DirMapping>]) {
        let transform = self.transform;
        for b in &mut self.boundaries {
            for p in b.unbound_portals.iter_mut().filter(|p| p.is_extern()) {
                let behind = transform.transform_point3(p.lcentre + p.plane.normal * -0.1);
                if let Some(stub) = resolve_extern_at(behind, mapping, mappings) {
                    p.stub = Some(stub);
                    p.target = crate::portal::PortalTarget::Unresolved;
                }
            }
        }
    }
}

/// Guess the chunk beyond an extern portal. Stubs in the portal's own mapping
/// are rejected and their reference released.
pub(crate) fn resolve_extern_at(
    behind: Vec3,
    own: &Arc<DirMapping>,
    mappings: &[Arc<DirMapping>],
) -> Option<crate::portal::StubRef> {
    let stub = guess_chunk(mappings, behind, true)?;
    if stub.mapping.id() == own.id() {
        stub.mapping.dec_ref();
        return None;
    }
    Some(stub)
}

/// A chunk load prepared on the main thread, runnable anywhere.
#[derive(Debug, Clone)]
pub struct LoadTicket {
    pub chunk: ChunkId,
    pub identifier: String,
    pub mapping: Arc<DirMapping>,
    pub mappings: Vec<Arc<DirMapping>>,
}

/// Result of running a [`LoadTicket`].
#[derive(Debug)]
pub struct LoadOutcome {
    pub chunk: ChunkId,
    pub identifier: String,
    pub mapping: Arc<DirMapping>,
    pub result: Result<ChunkBody, LoadError>,
}

impl LoadOutcome {
    pub fn good(&self) -> bool {
        matches!(&self.result, Ok(body) if body.good)
    }

    /// Throw away a load nobody will bind, releasing every mapping ref it
    /// holds: the ticket's own and those of stubs behind extern portals.
    pub fn discard(self) {
        let LoadOutcome { mapping, result, .. } = self;
        if let Ok(mut body) = result {
            body.release_foreign_stubs(&mapping);
        }
        mapping.dec_ref();
    }
}

impl LoadTicket {
    /// Read and parse the chunk document. Loads of a condemned mapping are
    /// abandoned before any I/O.
    pub fn load(self) -> LoadOutcome {
        let result = if self.mapping.is_condemned() {
            Err(LoadError::Condemned(self.mapping.path().to_string()))
        } else {
            self.mapping
                .source()
                .read_chunk(&self.identifier)
                .map(|doc| {
                    ChunkBody::from_doc(&self.identifier, &self.mapping, &self.mappings, doc.as_ref())
                })
                .map_err(LoadError::from)
        };
        LoadOutcome {
            chunk: self.chunk,
            identifier: self.identifier,
            mapping: self.mapping,
            result,
        }
    }
}
