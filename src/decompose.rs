use std::sync::Arc;

use itertools::izip;

use crate::{
    bfv::{BfvParameters, Ciphertext, Plaintext},
    error::{PirError, Result},
    rq::{Poly, Representation},
    utils::div_ceil,
};

/// Digits of `log2(t)` bits needed for every residue modulo `q_j`
fn digits_per_limb(params: &BfvParameters) -> Vec<usize> {
    let w = params.plaintext_bits();
    params
        .rq_context
        .moduli
        .iter()
        .map(|q| div_ceil(q.bits() as usize, w))
        .collect()
}

/// Splits the raw residues of `ct` into plaintexts of `log2(t)` bit digits.
///
/// For every component and every limb `j` it emits `ceil(bits(q_j) / log2(t))`
/// plaintexts, the `k`th holding bits `[k*w, (k+1)*w)` of each coefficient.
pub fn decompose_to_plaintexts(
    params: &Arc<BfvParameters>,
    ct: &Ciphertext,
    expansion_ratio: usize,
) -> Result<Vec<Plaintext>> {
    if ct.is_ntt_form() {
        return Err(PirError::InvalidCiphertext(
            "decomposition expects a ciphertext in power basis".into(),
        ));
    }

    let digits = digits_per_limb(params);
    let count = ct.size() * digits.iter().sum::<usize>();
    if count != expansion_ratio {
        return Err(PirError::DecompositionMismatch {
            expected: expansion_ratio,
            actual: count,
        });
    }

    let w = params.plaintext_bits();
    let mask = params.plaintext_modulus - 1;

    let mut result = Vec::with_capacity(count);
    for component in 0..ct.size() {
        for (j, ratio) in digits.iter().enumerate() {
            let limb = ct.limb(component, j)?;
            for k in 0..*ratio {
                let values: Vec<u64> = limb.iter().map(|c| (c >> (k * w)) & mask).collect();
                result.push(Plaintext::from_poly(Poly::try_from_vec_u64(
                    &params.rq_context,
                    &values,
                )));
            }
        }
    }

    Ok(result)
}

/// Rebuilds a two component ciphertext from the digits produced by
/// [`decompose_to_plaintexts`].
pub fn compose_from_plaintexts(params: &Arc<BfvParameters>, pts: &[Plaintext]) -> Result<Ciphertext> {
    let digits = digits_per_limb(params);
    let per_component = digits.iter().sum::<usize>();
    if pts.len() != 2 * per_component {
        return Err(PirError::DecompositionMismatch {
            expected: 2 * per_component,
            actual: pts.len(),
        });
    }

    let w = params.plaintext_bits();
    let ctx = &params.rq_context;

    let mut chunks = pts.iter();
    let mut cts = Vec::with_capacity(2);
    for _ in 0..2 {
        let mut poly = Poly::zero(ctx, Representation::PowerBasis);
        for (j, ratio) in digits.iter().enumerate() {
            let q = &ctx.moduli[j];
            let mut acc = vec![0u128; ctx.degree];
            for k in 0..*ratio {
                let pt = chunks
                    .next()
                    .ok_or_else(|| PirError::Internal("ran out of digits".into()))?;
                izip!(acc.iter_mut(), pt.coefficients().iter())
                    .for_each(|(a, d)| *a += (*d as u128) << (k * w));
            }
            let limb = poly
                .limb_mut(j)
                .ok_or_else(|| PirError::Internal(format!("missing limb {j}")))?;
            izip!(limb.iter_mut(), acc.iter()).for_each(|(l, a)| *l = q.reduce_u128(*a));
        }
        cts.push(poly);
    }

    Ciphertext::new(cts)
}
