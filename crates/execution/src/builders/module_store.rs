//! Builder of module-store transactions: verify, instrument, persist.

use super::common::{
    admit, failure_outcome, finish_success, Admitted, BuildFailure, BuilderEnv, SignedLead,
};
use crate::classloader::{ClassLoader, ClasspathError};
use crate::errors::ExecutionError;
use crate::state_view::StateView;
use arca_types::marshalling::{from_bytes, to_bytes};
use arca_types::requests::ModuleStoreRequest;
use arca_types::responses::{ModuleStoreFailedResponse, ModuleStoreSuccessfulResponse};
use arca_types::{TransactionReference, TransactionRequest, TransactionResponse};
use arca_vm::verifier::verify;
use arca_vm::{instrument, Module};
use tracing::info;

pub fn module_store<S: StateView>(
    request: &ModuleStoreRequest,
    reference: TransactionReference,
    env: &BuilderEnv<'_, S>,
) -> Result<TransactionResponse, BuildFailure> {
    let payload = TransactionRequest::ModuleStore(request.clone())
        .signed_payload()
        .map_err(|e| BuildFailure::Rejected(e.to_string()))?;
    let mut admitted = admit(
        env,
        SignedLead {
            caller: &request.caller,
            nonce: request.nonce,
            chain_id: &request.chain_id,
            gas_limit: request.gas_limit,
            gas_price: request.gas_price,
            classpath: &request.classpath,
            signature: &request.signature,
        },
        payload,
        reference,
    )?;

    // U3: every declared dependency must already be committed, which
    // makes the dependency DAG acyclic by construction.
    for dependency in &request.dependencies {
        match env.store.response(dependency)? {
            Some(response) if response.instrumented_module().is_some() => {}
            Some(_) => {
                return Err(BuildFailure::Rejected(format!(
                    "dependency {dependency} is not a module store"
                )))
            }
            None => {
                return Err(BuildFailure::Rejected(format!(
                    "unknown dependency {dependency}"
                )))
            }
        }
    }

    let charged = admitted
        .ctx
        .gas
        .charge_cpu(env.costs.module_install_cpu(request.module.len()))
        .and_then(|_| {
            admitted
                .ctx
                .gas
                .charge_ram(env.costs.module_install_ram(request.module.len()))
        });
    if let Err(error) = charged {
        return fail(&admitted, &error, "module installation");
    }

    match verify_and_instrument(request, env) {
        Ok(instrumented_bytes) => {
            let dependencies = request.dependencies.clone();
            let verification_version = env.consensus.verification_version;
            let shaped = finish_success(&mut admitted, &[], &|updates, gas| {
                TransactionResponse::ModuleStoreSuccessful(ModuleStoreSuccessfulResponse {
                    instrumented_module: instrumented_bytes.clone(),
                    dependencies: dependencies.clone(),
                    verification_version,
                    updates,
                    gas,
                })
            });
            match shaped {
                Ok(response) => {
                    info!(target: "builder", module = %reference, "module installed");
                    Ok(response)
                }
                Err(ExecutionError::State(e)) => Err(BuildFailure::State(e)),
                Err(error) => fail(&admitted, &error, "module installation"),
            }
        }
        Err(ModuleRejection::State(e)) => Err(BuildFailure::State(e.into())),
        Err(ModuleRejection::Unusable(message)) => Err(BuildFailure::Rejected(message)),
        Err(ModuleRejection::Failed { cause, message }) => {
            let error = ExecutionError::Contract {
                class_name: arca_types::ClassType::new(cause),
                message,
                checked: false,
            };
            fail(&admitted, &error, "module verification")
        }
    }
}

enum ModuleRejection {
    /// The module cannot be accepted and the failure is the sender's:
    /// a failed response is committed.
    Failed { cause: &'static str, message: String },
    /// The request is inadmissible (broken dependency chain).
    Unusable(String),
    State(arca_types::error::StorageError),
}

fn verify_and_instrument<S: StateView>(
    request: &ModuleStoreRequest,
    env: &BuilderEnv<'_, S>,
) -> Result<Vec<u8>, ModuleRejection> {
    let module: Module = match from_bytes(&request.module) {
        Ok(module) => module,
        Err(e) => {
            return Err(ModuleRejection::Failed {
                cause: "ModuleFormatError",
                message: e.to_string(),
            })
        }
    };

    let resolver = ClassLoader::build_for_roots(env.store, &request.dependencies).map_err(
        |e| match e {
            ClasspathError::Unusable(message) => ModuleRejection::Unusable(message),
            ClasspathError::State(arca_types::error::StateError::Storage(e)) => {
                ModuleRejection::State(e)
            }
            ClasspathError::State(other) => ModuleRejection::Unusable(other.to_string()),
        },
    )?;

    if env.consensus.skips_verification {
        // Test networks may install unchecked code; it still gets
        // instrumented so gas metering stays intact.
        let verified = arca_vm::VerifiedModule {
            infos: collect_infos(&module, &resolver),
            module,
        };
        let instrumented = instrument(&verified, &resolver, &env.costs);
        return to_bytes(&instrumented).map_err(|e| ModuleRejection::Failed {
            cause: "ModuleFormatError",
            message: e.to_string(),
        });
    }

    match verify(&module, &resolver, &env.whitelist, env.consensus.allows_self_charged) {
        Ok(verified) => {
            let instrumented = instrument(&verified, &resolver, &env.costs);
            to_bytes(&instrumented).map_err(|e| ModuleRejection::Failed {
                cause: "ModuleFormatError",
                message: e.to_string(),
            })
        }
        Err(error) => Err(ModuleRejection::Failed {
            cause: error.first_error_name(),
            message: error.to_string(),
        }),
    }
}

/// Hierarchy facts for the skip-verification path.
fn collect_infos(
    module: &Module,
    resolver: &ClassLoader,
) -> std::collections::BTreeMap<arca_types::ClassType, arca_vm::ClassInfo> {
    module
        .classes
        .iter()
        .filter_map(|c| {
            arca_vm::verifier::classify(module, resolver, &c.name).map(|i| (c.name.clone(), i))
        })
        .collect()
}

fn fail<S: StateView>(
    admitted: &Admitted<'_, S>,
    error: &ExecutionError,
    where_: &str,
) -> Result<TransactionResponse, BuildFailure> {
    let (updates, gas, penalty, cause) = failure_outcome(admitted, error, where_);
    Ok(TransactionResponse::ModuleStoreFailed(
        ModuleStoreFailedResponse {
            cause,
            updates,
            gas,
            gas_penalty: penalty,
        },
    ))
}
