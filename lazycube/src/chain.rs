use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use crate::region::Region;

/// Function applied to the values gathered for one output cell.
pub type LaneFn = Arc<dyn Fn(&[Option<f64>]) -> Option<f64> + Send + Sync>;

/// Function applied to each present cell value.
pub type CellFn = Arc<dyn Fn(f64) -> f64 + Send + Sync>;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Whether an operation's result for a cell depends only on that cell's own values.
///
/// Only chains made entirely of `CellIndependent` transforms may be downsampled before they
/// run.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Locality {
    CellIndependent,
    Neighborhood,
}

#[derive(Clone)]
pub enum Kernel {
    /// Element-wise function over every dimension
    Cell(CellFn),

    /// Function of the values along every dimension not in `over`; those dimensions are
    /// dropped
    Lane(LaneFn),

    /// Function of a `2 * radius + 1` window along each dimension in `over`
    Window { radius: usize, function: LaneFn },
}

/// A named function with an explicit locality tag.
///
#[derive(Clone)]
pub struct FunctionSpec {
    pub name: String,
    pub kernel: Kernel,
    pub locality: Locality,
}

impl FunctionSpec {
    pub fn cell<S, F>(name: S, function: F) -> Self
    where
        S: Into<String>,
        F: Fn(f64) -> f64 + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            kernel: Kernel::Cell(Arc::new(function)),
            locality: Locality::CellIndependent,
        }
    }

    pub fn lane<S, F>(name: S, function: F) -> Self
    where
        S: Into<String>,
        F: Fn(&[Option<f64>]) -> Option<f64> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            kernel: Kernel::Lane(Arc::new(function)),
            locality: Locality::CellIndependent,
        }
    }

    pub fn window<S, F>(name: S, radius: usize, function: F) -> Self
    where
        S: Into<String>,
        F: Fn(&[Option<f64>]) -> Option<f64> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            kernel: Kernel::Window {
                radius,
                function: Arc::new(function),
            },
            locality: Locality::Neighborhood,
        }
    }

    /// Builder method overriding the locality tag.
    ///
    /// Window kernels always need their neighbors and stay `Neighborhood`.
    ///
    pub fn with_locality(mut self, locality: Locality) -> Self {
        if !matches!(self.kernel, Kernel::Window { .. }) {
            self.locality = locality;
        }
        self
    }

    pub fn is_cell_independent(&self) -> bool {
        self.locality == Locality::CellIndependent
    }
}

impl fmt::Debug for FunctionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kernel {
            Kernel::Cell(_) => String::from("cell"),
            Kernel::Lane(_) => String::from("lane"),
            Kernel::Window { radius, .. } => format!("window(radius={radius})"),
        };
        write!(f, "{}[{kind}, {:?}]", self.name, self.locality)
    }
}

#[derive(Clone)]
pub enum Aggregation {
    Sum,
    Mean,
    Min,
    Max,

    /// Number of present cells
    Count,

    Custom(String, LaneFn),
}

impl Aggregation {
    pub fn custom<S, F>(name: S, function: F) -> Self
    where
        S: Into<String>,
        F: Fn(&[Option<f64>]) -> Option<f64> + Send + Sync + 'static,
    {
        Self::Custom(name.into(), Arc::new(function))
    }

    /// Aggregate a lane of values.
    ///
    /// Built in aggregations are absent if any input is absent, except `Count`.
    ///
    pub fn aggregate(&self, values: &[Option<f64>]) -> Option<f64> {
        match self {
            Aggregation::Sum => all_present(values).map(|present| present.iter().sum()),
            Aggregation::Mean => all_present(values)
                .map(|present| present.iter().sum::<f64>() / present.len() as f64),
            Aggregation::Min => all_present(values)?.into_iter().reduce(f64::min),
            Aggregation::Max => all_present(values)?.into_iter().reduce(f64::max),
            Aggregation::Count => Some(values.iter().flatten().count() as f64),
            Aggregation::Custom(_, function) => function(values),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Aggregation::Sum => "sum",
            Aggregation::Mean => "mean",
            Aggregation::Min => "min",
            Aggregation::Max => "max",
            Aggregation::Count => "count",
            Aggregation::Custom(name, _) => name,
        }
    }
}

impl fmt::Debug for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One deferred operation.
///
#[derive(Clone, Debug)]
pub enum PendingOp {
    /// Root of every chain: the native region and resolution of the source
    Read {
        region: Region,
        resolution: Vec<usize>,
    },

    /// A transform over the named dimensions
    Transform {
        function: FunctionSpec,
        over: Vec<String>,
    },

    /// An aggregation dropping the named dimensions
    Reduce {
        dimensions: Vec<String>,
        aggregation: Aggregation,
    },
}

impl PendingOp {
    /// Whether this operation may run after downsampling.
    pub fn is_reorderable(&self) -> bool {
        match self {
            PendingOp::Read { .. } | PendingOp::Reduce { .. } => true,
            PendingOp::Transform { function, .. } => function.is_cell_independent(),
        }
    }
}

/// A node in a persistent, singly linked chain of pending operations.
///
/// Nodes are never mutated. Appending makes a new node pointing at the old one, so chains
/// diverging from a shared ancestor share structure.
///
#[derive(Debug)]
pub struct Node {
    pub(crate) id: u64,
    pub(crate) op: PendingOp,
    pub(crate) prev: Option<Arc<Node>>,
}

impl Node {
    pub(crate) fn root(region: Region, resolution: Vec<usize>) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed),
            op: PendingOp::Read { region, resolution },
            prev: None,
        })
    }

    pub(crate) fn append(self: &Arc<Self>, op: PendingOp) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed),
            op,
            prev: Some(Arc::clone(self)),
        })
    }

    /// Operations from the root up to and including this node, in the order they were
    /// requested.
    ///
    pub(crate) fn ops(self: &Arc<Self>) -> Vec<PendingOp> {
        let mut ops = vec![];
        let mut current = Some(self);
        while let Some(node) = current {
            ops.push(node.op.clone());
            current = node.prev.as_ref();
        }
        ops.reverse();

        ops
    }

    pub(crate) fn len(self: &Arc<Self>) -> usize {
        let mut len = 0;
        let mut current = Some(self);
        while let Some(node) = current {
            len += 1;
            current = node.prev.as_ref();
        }

        len
    }
}

impl fmt::Display for PendingOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PendingOp::Read { resolution, .. } => write!(f, "read {resolution:?}"),
            PendingOp::Transform { function, over } => {
                write!(f, "transform {function:?} over {over:?}")
            }
            PendingOp::Reduce {
                dimensions,
                aggregation,
            } => write!(f, "reduce {dimensions:?} by {aggregation:?}"),
        }
    }
}

/// The values of a non-empty lane with no absent cells.
fn all_present(values: &[Option<f64>]) -> Option<Vec<f64>> {
    let present: Option<Vec<f64>> = values.iter().copied().collect();

    present.filter(|present| !present.is_empty())
}
