use wasm_bindgen::prelude::*;
use nform_core::fit::NormalFormFit;
use serde_wasm_bindgen::{from_value, to_value};

pub mod points;
pub mod request;

use points::{forward_point, inverse_point, normal_form_point};
use request::{run_request, FitRequest};

#[wasm_bindgen]
pub struct WasmNormalFormFit {
    fit: NormalFormFit,
}

#[wasm_bindgen]
impl WasmNormalFormFit {
    /// Runs the full fit for a serialized `FitRequest`.
    #[wasm_bindgen(constructor)]
    pub fn new(request: JsValue) -> Result<WasmNormalFormFit, JsValue> {
        console_error_panic_hook::set_once();

        let request: FitRequest = from_value(request)
            .map_err(|e| JsValue::from_str(&format!("Invalid fit request: {}", e)))?;
        let fit = run_request(&request)
            .map_err(|e| JsValue::from_str(&format!("Normal-form fit failed: {:#}", e)))?;
        Ok(WasmNormalFormFit { fit })
    }

    pub fn report(&self) -> Result<JsValue, JsValue> {
        to_value(&self.fit.report())
            .map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
    }

    pub fn maps(&self) -> Result<JsValue, JsValue> {
        let snapshot = self
            .fit
            .maps
            .snapshot()
            .map_err(|e| JsValue::from_str(&format!("Snapshot failed: {}", e)))?;
        to_value(&snapshot).map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
    }

    pub fn parameters(&self) -> Vec<f64> {
        self.fit.parameters().as_slice().to_vec()
    }

    pub fn forward(&self, z_re: Vec<f64>, z_im: Vec<f64>) -> Result<Vec<f64>, JsValue> {
        forward_point(&self.fit.maps, &z_re, &z_im)
            .map_err(|e| JsValue::from_str(&format!("Forward map failed: {:#}", e)))
    }

    pub fn inverse(&self, x: Vec<f64>) -> Result<JsValue, JsValue> {
        let reduced = inverse_point(&self.fit.maps, &x)
            .map_err(|e| JsValue::from_str(&format!("Inverse map failed: {:#}", e)))?;
        to_value(&reduced).map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
    }

    pub fn normal_form(&self, z_re: Vec<f64>, z_im: Vec<f64>) -> Result<JsValue, JsValue> {
        let image = normal_form_point(&self.fit.maps, &z_re, &z_im)
            .map_err(|e| JsValue::from_str(&format!("Normal form failed: {:#}", e)))?;
        to_value(&image).map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
    }
}
