use candle_core::{Device, Tensor};
use candle_nn::VarMap;
use log::{debug, info};
use std::collections::HashMap;
use std::path::Path;

/// What `load_varmap_lenient` did with each name
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadReport {
    /// variables overwritten from the file
    pub loaded: usize,
    /// variables with no tensor in the file; left as initialized
    pub missing: usize,
    /// tensors in the file with no matching variable
    pub skipped: usize,
}

/// Write all variables in `varmap` to a safetensors file
pub fn save_varmap<P: AsRef<Path>>(varmap: &VarMap, path: P) -> anyhow::Result<()> {
    varmap.save(path.as_ref())?;
    info!("wrote parameters: {}", path.as_ref().display());
    Ok(())
}

/// Read a safetensors file into `varmap`, tolerating both missing
/// and extra names. A same-named tensor of a different shape is an
/// error.
pub fn load_varmap_lenient<P: AsRef<Path>>(varmap: &VarMap, path: P) -> anyhow::Result<LoadReport> {
    let tensors: HashMap<String, Tensor> = candle_core::safetensors::load(path.as_ref(), &Device::Cpu)?;

    let data = varmap
        .data()
        .lock()
        .map_err(|e| anyhow::anyhow!("variable map lock: {}", e))?;

    let mut report = LoadReport::default();

    for (name, var) in data.iter() {
        match tensors.get(name) {
            Some(t) => {
                if t.dims() != var.dims() {
                    anyhow::bail!(
                        "{}: stored shape {:?} vs. model shape {:?}",
                        name,
                        t.dims(),
                        var.dims()
                    );
                }
                var.set(&t.to_dtype(var.dtype())?.to_device(var.device())?)?;
                report.loaded += 1;
            }
            None => {
                debug!("{} not found in {}", name, path.as_ref().display());
                report.missing += 1;
            }
        }
    }

    report.skipped = tensors.keys().filter(|k| !data.contains_key(*k)).count();

    info!(
        "loaded {} variables from {} ({} missing, {} skipped)",
        report.loaded,
        path.as_ref().display(),
        report.missing,
        report.skipped
    );
    Ok(report)
}

/// Overwrite the variable `name` in `varmap` with `value` (same
/// shape; dtype and device follow the variable)
pub fn overwrite_variable(varmap: &VarMap, name: &str, value: &Tensor) -> anyhow::Result<()> {
    let data = varmap
        .data()
        .lock()
        .map_err(|e| anyhow::anyhow!("variable map lock: {}", e))?;

    let var = data
        .get(name)
        .ok_or_else(|| anyhow::anyhow!("no variable named {}", name))?;

    if value.dims() != var.dims() {
        anyhow::bail!(
            "{}: new shape {:?} vs. variable shape {:?}",
            name,
            value.dims(),
            var.dims()
        );
    }
    var.set(&value.to_dtype(var.dtype())?.to_device(var.device())?)?;
    Ok(())
}
