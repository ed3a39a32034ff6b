//! BMAB SAM Predict
//!
//! 按框预测图像的 mask

use candle_core::{Device, Tensor};
use log::{error, info};
use pyo3::{
    pyclass, pymethods,
    types::{PyDict, PyDictMethods, PyType},
    Bound, Py, PyAny, PyResult, Python,
};

use crate::{
    core::{
        category::CATEGORY_SEGMENT,
        utils::image::{mask_to_tensor, tensor_to_image},
        PromptServer,
    },
    error::Error,
    segment::sam::{parse_boxes, sam_predict},
    wrapper::{
        comfyui::types::{NODE_IMAGE, NODE_MASK, NODE_STRING},
        torch::tensor::TensorWrapper,
    },
};

/// BMAB SAM Predict
#[pyclass(subclass)]
pub struct BMABSamPredict {}

impl PromptServer for BMABSamPredict {}

#[pymethods]
impl BMABSamPredict {
    #[new]
    fn new() -> Self {
        Self {}
    }

    #[classattr]
    #[pyo3(name = "RETURN_TYPES")]
    fn return_types() -> (&'static str,) {
        (NODE_MASK,)
    }

    #[classattr]
    #[pyo3(name = "RETURN_NAMES")]
    fn return_names() -> (&'static str,) {
        ("mask",)
    }

    #[classattr]
    #[pyo3(name = "CATEGORY")]
    const CATEGORY: &'static str = CATEGORY_SEGMENT;

    #[classattr]
    #[pyo3(name = "DESCRIPTION")]
    fn description() -> &'static str {
        "Predict masks with Segment Anything from bounding boxes [[x1, y1, x2, y2], ...]. \
         The image is passed to the predictor in RGB channel order."
    }

    #[classattr]
    #[pyo3(name = "FUNCTION")]
    const FUNCTION: &'static str = "predict";

    #[classmethod]
    #[pyo3(name = "INPUT_TYPES")]
    fn input_types(_cls: &Bound<'_, PyType>) -> PyResult<Py<PyDict>> {
        Python::with_gil(|py| {
            let dict = PyDict::new(py);
            dict.set_item("required", {
                let required = PyDict::new(py);
                required.set_item("image", (NODE_IMAGE,))?;
                required.set_item(
                    "boxes",
                    (NODE_STRING, {
                        let boxes = PyDict::new(py);
                        boxes.set_item("default", "[]")?;
                        boxes.set_item("multiline", true)?;
                        boxes.set_item("tooltip", "JSON list of boxes, [[x1, y1, x2, y2], ...]")?;
                        boxes
                    }),
                )?;
                required
            })?;
            Ok(dict.into())
        })
    }

    #[pyo3(name = "predict")]
    fn predict<'py>(
        &mut self,
        py: Python<'py>,
        image: Bound<'py, PyAny>,
        boxes: String,
    ) -> PyResult<(Bound<'py, PyAny>,)> {
        match self.predict_masks(py, &image, &boxes) {
            Ok(v) => Ok((v,)),
            Err(e) => {
                error!("BMABSamPredict error, {e}");
                if let Err(send_err) =
                    self.send_error(py, "BMABSamPredict".to_string(), e.to_string())
                {
                    error!("send error failed, {send_err}");
                };
                Err(e.into())
            }
        }
    }
}

impl BMABSamPredict {
    /// 每张图像一个 mask, 输出 [B, H, W]
    fn predict_masks<'py>(
        &self,
        py: Python<'py>,
        image: &Bound<'py, PyAny>,
        boxes: &str,
    ) -> Result<Bound<'py, PyAny>, Error> {
        let boxes = parse_boxes(boxes)?;
        let images = tensor_to_image(&TensorWrapper::new(image, &Device::Cpu)?.into_tensor())?;
        info!("BMABSamPredict images: {}, boxes: {}", images.len(), boxes.len());

        let mut masks = Vec::with_capacity(images.len());
        for image in images {
            let mask = sam_predict(py, &image.to_rgb8(), &boxes)?;
            masks.push(mask_to_tensor(&mask, &Device::Cpu)?);
        }
        if masks.is_empty() {
            return Err(Error::ListEmpty);
        }

        let masks = Tensor::stack(&masks, 0)?;
        TensorWrapper::from_tensor(masks).to_py_tensor(py)
    }
}
