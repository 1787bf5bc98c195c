//! Response functions: pluggable scalar weights of particle state.

use std::sync::Arc;

use crate::particle::ParticleState;

/// A scalar weighting of particle state applied to every raw contribution.
///
/// Evaluated concurrently from every worker thread.
pub trait ResponseFunction: Send + Sync {
    fn name(&self) -> &str;

    fn evaluate(&self, particle: &ParticleState) -> f64;

    /// Whether the response is independent of position. Track-length style
    /// tallies integrate over a segment and only accept uniform responses.
    fn is_spatially_uniform(&self) -> bool {
        true
    }
}

/// Shared handle to a response function.
pub type SharedResponse = Arc<dyn ResponseFunction>;

/// The default response: 1 everywhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnitResponse;

impl ResponseFunction for UnitResponse {
    fn name(&self) -> &str {
        "unit"
    }

    fn evaluate(&self, _particle: &ParticleState) -> f64 {
        1.0
    }
}

/// Response backed by a closure.
pub struct FnResponse<F> {
    name: String,
    uniform: bool,
    f: F,
}

impl<F> FnResponse<F>
where
    F: Fn(&ParticleState) -> f64 + Send + Sync,
{
    /// Spatially uniform response.
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            uniform: true,
            f,
        }
    }

    /// Response that depends on position.
    pub fn spatial(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            uniform: false,
            f,
        }
    }

    pub fn shared(self) -> SharedResponse
    where
        F: 'static,
    {
        Arc::new(self)
    }
}

impl<F> ResponseFunction for FnResponse<F>
where
    F: Fn(&ParticleState) -> f64 + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, particle: &ParticleState) -> f64 {
        (self.f)(particle)
    }

    fn is_spatially_uniform(&self) -> bool {
        self.uniform
    }
}

impl<F> std::fmt::Debug for FnResponse<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnResponse")
            .field("name", &self.name)
            .field("uniform", &self.uniform)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particle::ParticleType;

    #[test]
    fn unit_response() {
        let p = ParticleState::new(ParticleType::Photon).with_energy(3.0);
        assert_eq!(UnitResponse.evaluate(&p), 1.0);
        assert!(UnitResponse.is_spatially_uniform());
        assert_eq!(UnitResponse.name(), "unit");
    }

    #[test]
    fn closure_responses() {
        let p = ParticleState::new(ParticleType::Photon)
            .with_energy(3.0)
            .with_position([2.0, 0.0, 0.0]);
        let energy = FnResponse::new("energy", |p: &ParticleState| p.energy);
        assert_eq!(energy.evaluate(&p), 3.0);
        assert!(energy.is_spatially_uniform());

        let radial = FnResponse::spatial("x", |p: &ParticleState| p.position[0]).shared();
        assert_eq!(radial.evaluate(&p), 2.0);
        assert!(!radial.is_spatially_uniform());
        assert_eq!(radial.name(), "x");
    }
}
