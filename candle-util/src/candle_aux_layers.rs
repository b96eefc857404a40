use candle_core::{Result, Tensor};
use candle_nn::{Activation, BatchNorm, Dropout, Linear, Module, ModuleT, VarBuilder};

/// One block of a stack: `M -> [BatchNorm] -> [Activation] -> [Dropout]`
struct Block<M> {
    module: M,
    norm: Option<BatchNorm>,
    activation: Option<Activation>,
    dropout: Option<Dropout>,
}

/// build a stack of `M` layers, each optionally followed by batch
/// normalization, an activation and dropout
pub struct StackLayers<M>
where
    M: Module,
{
    blocks: Vec<Block<M>>,
}

impl<M> ModuleT for StackLayers<M>
where
    M: Module,
{
    fn forward_t(&self, input: &Tensor, train: bool) -> Result<Tensor> {
        let mut x = input.clone();
        for block in self.blocks.iter() {
            x = block.module.forward(&x)?;
            if let Some(norm) = &block.norm {
                x = norm.forward_t(&x, train)?;
            }
            if let Some(activation) = &block.activation {
                x = activation.forward(&x)?;
            }
            if let Some(dropout) = &block.dropout {
                x = dropout.forward_t(&x, train)?;
            }
        }
        Ok(x)
    }
}

impl<M> StackLayers<M>
where
    M: Module,
{
    pub fn new() -> Self {
        Self { blocks: Vec::new() }
    }

    /// Appends a layer after all the current layers.
    pub fn push_block(
        &mut self,
        layer: M,
        norm: Option<BatchNorm>,
        activation: Option<Activation>,
        dropout: Option<Dropout>,
    ) {
        self.blocks.push(Block {
            module: layer,
            norm,
            activation,
            dropout,
        });
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl<M> Default for StackLayers<M>
where
    M: Module,
{
    fn default() -> Self {
        Self::new()
    }
}

pub fn default_batch_norm_config() -> candle_nn::BatchNormConfig {
    candle_nn::BatchNormConfig {
        eps: 1e-4,
        remove_mean: true,
        affine: true,
        momentum: 0.1,
    }
}

/// A fully connected network over `in_dim -> layers[0] -> ... -> layers[L-1]`,
/// each block `Linear -> BatchNorm -> activation -> Dropout(p)`
/// (no dropout if `dropout == 0`).
///
/// Creates these variables:
/// * `{name}.{j}.weight`, `{name}.{j}.bias` for the linear maps
/// * `{name}.{j}.bn.*` for the batch normalization
///
/// Returns the stack and its output width.
pub fn build_network(
    name: &str,
    in_dim: usize,
    layers: &[usize],
    activation: Activation,
    dropout: f32,
    vs: VarBuilder,
) -> Result<(StackLayers<Linear>, usize)> {
    if !(0.0..1.0).contains(&dropout) {
        candle_core::bail!("dropout probability {} is not in [0, 1)", dropout);
    }

    let mut fc = StackLayers::<Linear>::new();
    let mut prev_dim = in_dim;

    for (j, &next_dim) in layers.iter().enumerate() {
        let _name = format!("{}.{}", name, j);
        let linear = candle_nn::linear(prev_dim, next_dim, vs.pp(&_name))?;
        let norm = candle_nn::batch_norm(
            next_dim,
            default_batch_norm_config(),
            vs.pp(format!("{}.bn", _name)),
        )?;
        let dropout = (dropout > 0.0).then(|| Dropout::new(dropout));
        fc.push_block(linear, Some(norm), Some(activation), dropout);
        prev_dim = next_dim;
    }

    Ok((fc, prev_dim))
}
