//! 分割相关的节点

use pyo3::{
    types::{PyModule, PyModuleMethods},
    Bound, PyResult, Python,
};

use crate::core::node::NodeRegister;

pub mod sam;

mod sam_predict;
pub use sam_predict::BMABSamPredict;

mod sam_release;
pub use sam_release::BMABSamRelease;

/// 分割模块
pub fn submodule(py: Python<'_>) -> PyResult<Bound<'_, PyModule>> {
    let submodule = PyModule::new(py, "segment")?;
    submodule.add_class::<BMABSamPredict>()?;
    submodule.add_class::<BMABSamRelease>()?;
    Ok(submodule)
}

/// segment node register
pub fn node_register(py: Python<'_>) -> PyResult<Vec<NodeRegister<'_>>> {
    let nodes: Vec<NodeRegister> = vec![
        NodeRegister(
            "BMAB SAM Predict",
            py.get_type::<BMABSamPredict>(),
            "BMAB SAM Predict",
        ),
        NodeRegister(
            "BMAB SAM Release",
            py.get_type::<BMABSamRelease>(),
            "BMAB SAM Release",
        ),
    ];
    Ok(nodes)
}
