use thiserror::Error;

/// Fatal invariant violations.
///
/// These indicate that an input ARG/thread pair is not SMC-consistent (a
/// precondition failure), never a transient fault. Each variant carries the
/// minimal diagnostic payload; variants that need topological context embed
/// a rendered local tree so the failure can be inspected after the fact.
#[derive(Debug, Error)]
pub enum InvariantError {
    #[error("duplicate recombination position {pos} after discretization")]
    DuplicateRecombPos { pos: i64 },

    #[error("node age {age} is not on the time grid")]
    OffGridAge { age: f64 },

    #[error(
        "lca walk for clade {clade:?} overshot target time {target}: \
         reached parent at age {reached}\nlocal tree:\n{tree}"
    )]
    WalkUpOvershoot {
        clade: Vec<String>,
        target: f64,
        reached: f64,
        tree: String,
    },

    #[error(
        "recombination time {rtime} above coalescence time {ctime} \
         at position {pos}"
    )]
    RecombAboveCoal { pos: i64, rtime: f64, ctime: f64 },

    #[error(
        "inserted lineage coalesces at {computed} at position {pos}, \
         thread states {stated}\nleft tree:\n{last_tree}\nright tree:\n{tree}"
    )]
    CoalTimeMismatch {
        pos: i64,
        computed: f64,
        stated: f64,
        last_tree: String,
        tree: String,
    },

    #[error("no deterministic transition for state ({node}, {time})")]
    UndefinedTransition { node: String, time: usize },

    #[error("state ({node}, {time}) missing from adjacent state space")]
    UnknownState { node: String, time: usize },

    #[error(
        "adjacent trees do not differ by a single SPR \
         (recomb and coal both on branch {recomb}/{coal})"
    )]
    NotAnSpr { recomb: String, coal: String },
}
