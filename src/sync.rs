use std::ops::Range;

use log::debug;

use crate::{
    collective::Collective,
    error::{RefineErr, Result, Stage},
    partition::displacements,
};

/// The assignments and indifference flags computed by one worker for the users it owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialResult {
    pub range: Range<usize>,
    pub participation: Vec<u32>,
    pub indifference: Vec<bool>,
}

/// The assignment and indifference of every user, ordered by user index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalVectors {
    pub participation: Vec<u32>,
    pub indifference: Vec<bool>,
}

fn mismatch(what: &'static str, got: usize, expected: usize) -> RefineErr {
    RefineErr::LengthMismatch {
        stage: Stage::Synchronize,
        what,
        got,
        expected,
    }
}

/// Places every worker's slice at the offset implied by the sizes of the workers before it.
fn assemble(
    total: usize,
    sizes: Vec<Vec<usize>>,
    participation: Vec<Vec<u32>>,
    indifference: Vec<Vec<bool>>,
) -> Result<GlobalVectors> {
    let sizes = sizes
        .into_iter()
        .enumerate()
        .map(|(rank, size)| match size[..] {
            [size] => Ok(size),
            _ => Err(RefineErr::Protocol(format!(
                "worker {rank} announced {} sizes instead of one",
                size.len()
            ))),
        })
        .collect::<Result<Vec<_>>>()?;

    let announced: usize = sizes.iter().sum();
    if announced != total {
        return Err(mismatch("announced users", announced, total));
    }

    let mut global = GlobalVectors {
        participation: vec![0; total],
        indifference: vec![false; total],
    };

    let offsets = displacements(&sizes);
    let parts = participation.into_iter().zip(indifference);

    for ((&offset, &size), (assigned, flags)) in offsets.iter().zip(&sizes).zip(parts) {
        if assigned.len() != size {
            return Err(mismatch("gathered participation", assigned.len(), size));
        }

        if flags.len() != size {
            return Err(mismatch("gathered indifference", flags.len(), size));
        }

        global.participation[offset..offset + size].copy_from_slice(&assigned);
        global.indifference[offset..offset + size].copy_from_slice(&flags);
    }

    Ok(global)
}

/// Merges every worker's partial result into global vectors held identically by all workers.
///
/// Every worker of the group must call it with its own partial result. The
/// coordinator collects the sizes and slices, assembles them in user order
/// and broadcasts the complete vectors, nothing partially merged is ever sent.
///
/// # Arguments
/// * `comm` - The group's collective handle.
/// * `total` - The total amount of users.
/// * `partial` - This worker's results.
///
/// # Returns
/// The global participation and indifference vectors, or the first synchronization failure.
pub async fn synchronize<C: Collective>(
    comm: &mut C,
    total: usize,
    partial: PartialResult,
) -> Result<GlobalVectors> {
    let PartialResult {
        range,
        participation,
        indifference,
    } = partial;

    if participation.len() != range.len() {
        return Err(mismatch("partial participation", participation.len(), range.len()));
    }

    if indifference.len() != range.len() {
        return Err(mismatch("partial indifference", indifference.len(), range.len()));
    }

    comm.barrier().await?;
    debug!(rank = comm.rank(), users = range.len(); "all workers finished their local pass");

    let sizes = comm.gather(vec![range.len()]).await?;
    let participation = comm.gather(participation).await?;
    let indifference = comm.gather(indifference).await?;

    let assembled = match (sizes, participation, indifference) {
        (Some(sizes), Some(participation), Some(indifference)) => {
            Some(assemble(total, sizes, participation, indifference)?)
        }
        (None, None, None) => None,
        _ => {
            return Err(RefineErr::Protocol(
                "gather results are only partially available".into(),
            ));
        }
    };

    let (participation, indifference) = assembled
        .map(|global| (global.participation, global.indifference))
        .unzip();

    let participation = comm.broadcast(participation).await?;
    let indifference = comm.broadcast(indifference).await?;

    if participation.len() != total {
        return Err(mismatch("broadcast participation", participation.len(), total));
    }

    if indifference.len() != total {
        return Err(mismatch("broadcast indifference", indifference.len(), total));
    }

    Ok(GlobalVectors {
        participation,
        indifference,
    })
}
