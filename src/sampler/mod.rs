//! 采样相关的节点

use pyo3::{
    types::{PyModule, PyModuleMethods},
    Bound, PyResult, Python,
};

use crate::core::node::NodeRegister;

mod common;

mod integrator;
pub use integrator::BMABIntegrator;

mod extractor;
pub use extractor::BMABExtractor;

mod seed_generator;
pub use seed_generator::BMABSeedGenerator;

mod ksampler;
pub use ksampler::BMABKSampler;

mod ksampler_hires_fix;
pub use ksampler_hires_fix::BMABKSamplerHiresFix;

mod prompt;
pub use prompt::BMABPrompt;

mod lora_loader;
pub use lora_loader::BMABLoraLoader;

/// 采样模块
pub fn submodule(py: Python<'_>) -> PyResult<Bound<'_, PyModule>> {
    let submodule = PyModule::new(py, "sampler")?;
    submodule.add_class::<BMABIntegrator>()?;
    submodule.add_class::<BMABExtractor>()?;
    submodule.add_class::<BMABSeedGenerator>()?;
    submodule.add_class::<BMABKSampler>()?;
    submodule.add_class::<BMABKSamplerHiresFix>()?;
    submodule.add_class::<BMABPrompt>()?;
    submodule.add_class::<BMABLoraLoader>()?;
    Ok(submodule)
}

/// sampler node register
pub fn node_register(py: Python<'_>) -> PyResult<Vec<NodeRegister<'_>>> {
    let nodes: Vec<NodeRegister> = vec![
        NodeRegister(
            "BMAB Integrator",
            py.get_type::<BMABIntegrator>(),
            "BMAB Integrator",
        ),
        NodeRegister(
            "BMAB Extractor",
            py.get_type::<BMABExtractor>(),
            "BMAB Extractor",
        ),
        NodeRegister(
            "BMAB SeedGenerator",
            py.get_type::<BMABSeedGenerator>(),
            "BMAB Seed Generator",
        ),
        NodeRegister(
            "BMAB KSampler",
            py.get_type::<BMABKSampler>(),
            "BMAB KSampler",
        ),
        NodeRegister(
            "BMAB KSamplerHiresFix",
            py.get_type::<BMABKSamplerHiresFix>(),
            "BMAB KSampler Hires. Fix",
        ),
        NodeRegister("BMAB Prompt", py.get_type::<BMABPrompt>(), "BMAB Prompt"),
        NodeRegister(
            "BMAB Lora Loader",
            py.get_type::<BMABLoraLoader>(),
            "BMAB Lora Loader",
        ),
    ];
    Ok(nodes)
}
