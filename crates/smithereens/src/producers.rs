// Standard Library Imports
use std::fmt::Debug;

// External Crate Imports
use polychem::CrossLinker;

// Local Crate Imports
use crate::Fragment;

// Public API ==========================================================================================================

/// Builds the fragments that only exist because two peptides are joined by a cross-linker
///
/// Producers must cope with an empty `beta`, which is how they're called while building the fragment index
pub trait CrossLinkedFragmentProducer: Debug + Send + Sync {
    fn produce<'p>(
        &self,
        alpha: &[Fragment<'p>],
        beta: &[Fragment<'p>],
        crosslinker: &CrossLinker,
    ) -> Vec<Fragment<'p>>;
}

/// Fragments of one peptide that still carry the whole of the other peptide
#[derive(Copy, Clone, Debug, Default)]
pub struct PeptideIonProducer;

impl CrossLinkedFragmentProducer for PeptideIonProducer {
    fn produce<'p>(
        &self,
        alpha: &[Fragment<'p>],
        beta: &[Fragment<'p>],
        crosslinker: &CrossLinker,
    ) -> Vec<Fragment<'p>> {
        if crosslinker.is_non_covalent() {
            return Vec::new();
        }

        let mut fragments = Vec::new();
        if let Some(beta_ion) = peptide_ion(beta) {
            fragments.extend(
                linkable(alpha, crosslinker)
                    .map(|fragment| fragment.linked_to(beta_ion.peptide(), crosslinker.mass())),
            );
        }
        // NOTE: The alpha and beta peptide ions have already been joined above
        if let Some(alpha_ion) = peptide_ion(alpha) {
            fragments.extend(
                linkable(beta, crosslinker)
                    .filter(|fragment| !fragment.is_peptide_ion())
                    .map(|fragment| fragment.linked_to(alpha_ion.peptide(), crosslinker.mass())),
            );
        }
        fragments
    }
}

/// Fragments carrying the remnant of a cleavable cross-linker
#[derive(Copy, Clone, Debug, Default)]
pub struct StubProducer;

impl CrossLinkedFragmentProducer for StubProducer {
    fn produce<'p>(
        &self,
        alpha: &[Fragment<'p>],
        beta: &[Fragment<'p>],
        crosslinker: &CrossLinker,
    ) -> Vec<Fragment<'p>> {
        let fragments: Vec<_> = linkable(alpha, crosslinker)
            .chain(linkable(beta, crosslinker))
            .collect();
        crosslinker
            .stubs()
            .iter()
            .flat_map(|&stub| fragments.iter().map(move |fragment| fragment.with_stub(stub)))
            .collect()
    }
}

// Private Helper Functions ============================================================================================

fn peptide_ion<'a, 'p>(fragments: &'a [Fragment<'p>]) -> Option<&'a Fragment<'p>> {
    fragments
        .iter()
        .find(|fragment| fragment.is_peptide_ion() && fragment.is_unlinked() && !fragment.is_lossy())
}

fn linkable<'a, 'p>(
    fragments: &'a [Fragment<'p>],
    crosslinker: &'a CrossLinker,
) -> impl Iterator<Item = &'a Fragment<'p>> {
    fragments.iter().filter(|fragment| {
        fragment.is_unlinked()
            && !fragment.is_lossy()
            && crosslinker.links_fragment(fragment.peptide(), fragment.range())
    })
}

// Module Tests ========================================================================================================
