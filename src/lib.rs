pub mod apex;
mod batch;
pub mod coefficients;
pub mod error;
pub mod field;
pub mod geo;
pub mod grid;
pub mod legendre;
pub mod model;
pub mod rotation;
pub mod solar;
pub mod synthesis;
pub mod time;

#[cfg(test)]
mod helpers {
    pub mod test;
}

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use wasm_bindgen::prelude::*;

pub use apex::{ApexEpoch, ApexExpansion, ApexModel};
pub use coefficients::{CoefficientSet, Coefficients, Harmonics, Validity};
pub use error::{MagError, MagResult};
pub use field::{FieldVector, IncDecNorm, IntoIncDecNorm};
pub use geo::{CoordinateSystem, Ellipsoid, Position, EARTH_RADIUS, WGS84};
pub use model::{EvalOptions, EvaluatedField, Extrapolation, MagneticModel};
pub use rotation::{Frame, VectorRotator};
pub use synthesis::Mode;

fn to_js(err: MagError) -> JsValue {
    JsValue::from_str(&err.to_string())
}

#[derive(Deserialize)]
struct FieldRequest {
    sets: Vec<CoefficientSet>,
    positions: Vec<Position>,
    times: Vec<f64>,
    #[serde(default)]
    options: EvalOptions,
}

/// Evaluates a model given as a list of coefficient sets. Invalid points come
/// back as `null` entries instead of failing the whole batch.
#[wasm_bindgen]
pub fn eval_field(js_request: JsValue) -> Result<JsValue, JsValue> {
    console_error_panic_hook::set_once();
    let request: FieldRequest = serde_wasm_bindgen::from_value(js_request)?;

    let model =
        MagneticModel::new(request.sets.into_iter().map(Arc::new).collect()).map_err(to_js)?;
    let fields: Vec<Option<EvaluatedField>> = model
        .eval_lenient(&request.positions, &request.times, &request.options)
        .map_err(to_js)?
        .into_iter()
        .map(Result::ok)
        .collect();

    Ok(serde_wasm_bindgen::to_value(&fields)?)
}

#[derive(Deserialize)]
struct ApexRequest {
    model: ApexModel,
    positions: Vec<Position>,
    /// Decimal years, one per position or a single shared one.
    times: Vec<f64>,
}

#[derive(Serialize)]
struct ApexPoint {
    qdlat: f64,
    qdlon: f64,
    mlt: Option<f64>,
}

/// Quasi-dipole coordinates, with MLT when the model carries an MLT expansion.
#[wasm_bindgen]
pub fn eval_apex_coordinates(js_request: JsValue) -> Result<JsValue, JsValue> {
    console_error_panic_hook::set_once();
    let request: ApexRequest = serde_wasm_bindgen::from_value(js_request)?;
    let model = &request.model;

    let qd = model
        .eval_qdlatlon_batch(&request.positions, &request.times)
        .map_err(to_js)?;
    let mut points = Vec::with_capacity(qd.len());
    for (i, (qdlat, qdlon)) in qd.into_iter().enumerate() {
        let year = if request.times.len() == 1 { request.times[0] } else { request.times[i] };
        let mlt = match time::decimal_year_to_mjd2000(year).and_then(|t| model.eval_mlt(qdlon, t)) {
            Ok(mlt) => Some(mlt),
            Err(MagError::MissingModel { .. }) => None,
            Err(err) => return Err(to_js(err)),
        };
        points.push(ApexPoint { qdlat, qdlon, mlt });
    }

    Ok(serde_wasm_bindgen::to_value(&points)?)
}

/// Sub-solar (latitude, longitude) pairs for MJD2000 times.
#[wasm_bindgen]
pub fn subsolar_points(js_times: JsValue) -> Result<JsValue, JsValue> {
    console_error_panic_hook::set_once();
    let times: Vec<f64> = serde_wasm_bindgen::from_value(js_times)?;
    let points = solar::eval_subsol_batch(&times).map_err(to_js)?;
    Ok(serde_wasm_bindgen::to_value(&points)?)
}
