//! Oblivious expansion of a packed query into a one hot selection vector.
//!
//! A query for a dimension of size `m` encrypts `X^p` for the selected
//! position `p`. Every folding round splits each ciphertext into the even and
//! odd powers of `X` with one automorphism, so after `ceil(log2(m))` rounds the
//! `a`th ciphertext encrypts a constant that is non zero iff `a == p`. The
//! server performs the same operations for every `p`.

use rayon::prelude::*;
use tracing::debug;

use crate::{
    bfv::Ciphertext,
    error::{PirError, Result},
    ksk::GaloisKeys,
    rq::negacyclic_shift,
    utils::{ceil_log2, ilog2},
};

/// Galois elements `N/2^i + 1` used by the folding rounds, `i` in `0..log2(N)`
pub fn galois_elements(degree: usize) -> Vec<usize> {
    (0..ilog2(degree)).map(|i| (degree >> i) + 1).collect()
}

/// Writes `encrypted * X^index` into `destination`, per component and limb.
///
/// Both ciphertexts must be in power basis with matching shape. `index` must
/// be in `[0, 2N)`.
pub fn multiply_power_of_x(
    encrypted: &Ciphertext,
    destination: &mut Ciphertext,
    index: usize,
) -> Result<()> {
    let ctx = encrypted.context().clone();
    if index >= 2 * ctx.degree {
        return Err(PirError::InvalidCiphertext(format!(
            "monomial X^{index} is outside [0, {})",
            2 * ctx.degree
        )));
    }
    if encrypted.is_ntt_form() || destination.is_ntt_form() {
        return Err(PirError::InvalidCiphertext(
            "monomial shift expects ciphertexts in power basis".into(),
        ));
    }
    if encrypted.size() != destination.size() || destination.context() != &ctx {
        return Err(PirError::InvalidCiphertext(
            "destination does not match the shape of the ciphertext".into(),
        ));
    }

    for component in 0..encrypted.size() {
        for (j, q) in ctx.moduli.iter().enumerate() {
            negacyclic_shift(
                encrypted.limb(component, j)?,
                index,
                q,
                destination.limb_mut(component, j)?,
            );
        }
    }
    Ok(())
}

/// One folding round with galois element `N/2^i + 1`.
///
/// Positions at or past `threshold` are doubled instead of being split.
fn fold(
    keys: &GaloisKeys,
    temp: &[Ciphertext],
    i: usize,
    degree: usize,
    threshold: usize,
) -> Result<Vec<Ciphertext>> {
    let g = (degree >> i) + 1;
    let index_raw = 2 * degree - (1 << i);
    let index = (index_raw * g) % (2 * degree);

    let children = temp
        .par_iter()
        .enumerate()
        .map(|(a, c)| -> Result<(Ciphertext, Option<Ciphertext>)> {
            if a >= threshold {
                return Ok((c * 2, None));
            }

            let rotated = keys.apply_galois(c, g)?;
            let low = c + &rotated;

            let mut shifted = c.clone();
            multiply_power_of_x(c, &mut shifted, index_raw)?;
            let mut rotated_shifted = rotated.clone();
            multiply_power_of_x(&rotated, &mut rotated_shifted, index)?;
            let high = &shifted + &rotated_shifted;

            Ok((low, Some(high)))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut newtemp = Vec::with_capacity(2 * temp.len());
    let mut highs = Vec::with_capacity(temp.len());
    for (low, high) in children {
        newtemp.push(low);
        highs.extend(high);
    }
    newtemp.extend(highs);
    Ok(newtemp)
}

/// Expands `encrypted` into `m` selector ciphertexts in power basis.
///
/// `m` must be in `1..=N`. Each output holds `2^ceil(log2(m))` times the
/// matching coefficient of the input, so clients scale queries down by that
/// factor.
pub fn expand_query(keys: &GaloisKeys, encrypted: &Ciphertext, m: usize) -> Result<Vec<Ciphertext>> {
    let degree = encrypted.context().degree;
    if m == 0 || m > degree {
        return Err(PirError::MalformedQuery(format!(
            "cannot expand into {m} ciphertexts with ring degree {degree}"
        )));
    }

    let mut input = encrypted.clone();
    input.transform_from_ntt();
    if m == 1 {
        return Ok(vec![input]);
    }

    let logm = ceil_log2(m as u64) as usize;
    let mut temp = vec![input];

    for i in 0..logm - 1 {
        // no corner cases before the last round
        temp = fold(keys, &temp, i, degree, temp.len())?;
    }

    let threshold = m - (1 << (logm - 1));
    temp = fold(keys, &temp, logm - 1, degree, threshold)?;
    temp.truncate(m);

    debug!(m, rounds = logm, "expanded query");
    Ok(temp)
}
