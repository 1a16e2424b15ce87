//! Admission checks and the shared gas accounting of non-initial
//! transactions.

use crate::caches::NodeCaches;
use crate::classloader::ClasspathError;
use crate::context::{ExecutionContext, RuntimeValue};
use crate::deserializer::deserialize;
use crate::errors::ExecutionError;
use crate::extractor::extract_updates;
use crate::state_view::StateView;
use arca_crypto::sign::{PublicKey, SignatureSuite};
use arca_types::config::ConsensusParams;
use arca_types::error::StateError;
use arca_types::marshalling::to_bytes;
use arca_types::responses::{FailureCause, GasConsumption};
use arca_types::updates::UpdateValue;
use arca_types::{
    lang, FieldSignature, StorageReference, TransactionReference, TransactionResponse, Update,
};
use arca_vm::{GasCostModel, WhiteList};
use num_bigint::BigInt;
use std::str::FromStr;

/// Why no response could be produced. `Rejected` requests leave no trace
/// in the store; `State` failures abort the whole commit.
#[derive(Debug)]
pub enum BuildFailure {
    Rejected(String),
    State(StateError),
}

impl From<StateError> for BuildFailure {
    fn from(e: StateError) -> Self {
        BuildFailure::State(e)
    }
}

impl From<ClasspathError> for BuildFailure {
    fn from(e: ClasspathError) -> Self {
        match e {
            ClasspathError::Unusable(message) => BuildFailure::Rejected(message),
            ClasspathError::State(e) => BuildFailure::State(e),
        }
    }
}

/// Everything a builder needs besides the request.
pub struct BuilderEnv<'a, S: StateView> {
    pub store: &'a S,
    pub caches: &'a NodeCaches,
    pub consensus: ConsensusParams,
    pub costs: GasCostModel,
    pub whitelist: WhiteList,
    /// `Some(cap)` when running a view call that is never committed:
    /// signature and nonce checks are skipped and gas is capped.
    pub view_gas_cap: Option<u64>,
}

/// The fields shared by all signed request kinds.
pub struct SignedLead<'r> {
    pub caller: &'r StorageReference,
    pub nonce: u64,
    pub chain_id: &'r str,
    pub gas_limit: u64,
    pub gas_price: u64,
    pub classpath: &'r TransactionReference,
    pub signature: &'r [u8],
}

/// An admitted non-initial transaction: context with the gas reserved and
/// the caller's nonce already advanced.
pub struct Admitted<'a, S: StateView> {
    pub ctx: ExecutionContext<'a, S>,
    pub caller: usize,
    pub gas_limit: u64,
    pub gas_price: u64,
    /// Committed values, for the penalty branch.
    pub balance_before: BigInt,
    pub nonce_before: BigInt,
}

impl<'a, S: StateView> Admitted<'a, S> {
    pub fn gas_debit(&self) -> BigInt {
        BigInt::from(self.gas_limit) * BigInt::from(self.gas_price)
    }
}

/// Runs the admission pipeline of §U2: caller is an externally owned
/// account, the nonce matches, the signature verifies, the gas limit is
/// within bounds and the caller can pay for it, the classpath resolves.
pub fn admit<'a, S: StateView>(
    env: &'a BuilderEnv<'a, S>,
    lead: SignedLead<'_>,
    request_bytes_for_signing: Vec<u8>,
    reference: TransactionReference,
) -> Result<Admitted<'a, S>, BuildFailure> {
    if let Some(cap) = env.view_gas_cap {
        if lead.gas_limit > cap {
            return Err(BuildFailure::Rejected("too much gas for view".into()));
        }
    } else if lead.chain_id != env.consensus.chain_id {
        return Err(BuildFailure::Rejected(format!(
            "chain mismatch: expected {:?}, got {:?}",
            env.consensus.chain_id, lead.chain_id
        )));
    }

    if lead.gas_limit < env.costs.minimum_gas() {
        return Err(BuildFailure::Rejected(format!(
            "gas limit below the minimum of {}",
            env.costs.minimum_gas()
        )));
    }
    if lead.gas_limit > env.consensus.max_gas_per_transaction {
        return Err(BuildFailure::Rejected("gas limit above the maximum".into()));
    }
    if !env.consensus.ignore_gas_price && lead.gas_price < env.consensus.gas_price {
        return Err(BuildFailure::Rejected(format!(
            "gas price below the current price of {}",
            env.consensus.gas_price
        )));
    }

    let loader = env.caches.classloader_for(env.store, lead.classpath)?;
    let mut ctx = ExecutionContext::new(
        env.store,
        loader,
        &env.costs,
        reference,
        lead.gas_limit,
    );

    let caller = deserialize(&mut ctx, lead.caller).map_err(admission_error)?;
    let caller_class = ctx.object(caller).class.clone();
    if !ctx.loader.is_account(&caller_class) {
        return Err(BuildFailure::Rejected(format!(
            "caller {caller_class} is not an externally owned account"
        )));
    }

    let nonce_before = read_big_integer(&ctx, caller, &FieldSignature::eoa_nonce())?;
    let balance_before = ctx.balance_of(caller, false).map_err(admission_error)?;

    if env.view_gas_cap.is_none() {
        if nonce_before != BigInt::from(lead.nonce) {
            return Err(BuildFailure::Rejected(format!(
                "nonce mismatch: expected {nonce_before}, got {}",
                lead.nonce
            )));
        }
        verify_signature(env, &ctx, caller, &request_bytes_for_signing, lead.signature, reference)?;
    }

    let debit = BigInt::from(lead.gas_limit) * BigInt::from(lead.gas_price);
    if balance_before < debit {
        return Err(BuildFailure::Rejected(
            "the caller cannot pay for the gas limit".into(),
        ));
    }

    // Pessimistic reservation and nonce bump: these survive every branch.
    ctx.set_balance(caller, false, balance_before.clone() - &debit)
        .map_err(admission_error)?;
    ctx.write_field(
        caller,
        &FieldSignature::eoa_nonce(),
        RuntimeValue::BigInt(nonce_before.clone() + 1),
    )
    .map_err(admission_error)?;

    ctx.gas
        .charge_cpu(env.costs.base_cpu_transaction)
        .map_err(admission_error)?;

    Ok(Admitted {
        ctx,
        caller,
        gas_limit: lead.gas_limit,
        gas_price: lead.gas_price,
        balance_before,
        nonce_before,
    })
}

fn verify_signature<S: StateView>(
    env: &BuilderEnv<'_, S>,
    ctx: &ExecutionContext<'_, S>,
    caller: usize,
    payload: &[u8],
    signature: &[u8],
    reference: TransactionReference,
) -> Result<(), BuildFailure> {
    let suite = SignatureSuite::from_str(&env.consensus.signature)
        .map_err(|e| BuildFailure::Rejected(e.to_string()))?;
    if suite == SignatureSuite::Empty {
        return Ok(());
    }

    // Test networks may let the gamete act as an unsigned faucet.
    if env.consensus.allow_unsigned_faucet && signature.is_empty() {
        let caller_reference = ctx.object(caller).reference;
        if env.store.gamete()? == Some(caller_reference) {
            return Ok(());
        }
    }

    let key_string = match read_field_value(ctx, caller, &FieldSignature::eoa_public_key())? {
        RuntimeValue::Str(s) => s,
        _ => {
            return Err(BuildFailure::Rejected(
                "the caller has no public key".into(),
            ))
        }
    };
    let key = PublicKey::from_base64(suite, &key_string)
        .map_err(|e| BuildFailure::Rejected(e.to_string()))?;

    let verdict = match env.caches.signature_verdict(reference.0, key.as_bytes()) {
        Some(cached) => cached,
        None => {
            let fresh = key.verify(payload, signature);
            env.caches
                .record_signature_verdict(reference.0, key.as_bytes(), fresh);
            fresh
        }
    };
    if verdict {
        Ok(())
    } else {
        Err(BuildFailure::Rejected("invalid request signature".into()))
    }
}

/// Admission-time execution errors become rejections; store errors abort.
pub fn admission_error(e: ExecutionError) -> BuildFailure {
    match e {
        ExecutionError::State(e) => BuildFailure::State(e),
        ExecutionError::OutOfGas => {
            BuildFailure::Rejected("not enough gas to admit the request".into())
        }
        other => BuildFailure::Rejected(other.to_string()),
    }
}

fn read_field_value<S: StateView>(
    ctx: &ExecutionContext<'_, S>,
    index: usize,
    field: &FieldSignature,
) -> Result<RuntimeValue, BuildFailure> {
    ctx.read_field(index, field).map_err(admission_error)
}

fn read_big_integer<S: StateView>(
    ctx: &ExecutionContext<'_, S>,
    index: usize,
    field: &FieldSignature,
) -> Result<BigInt, BuildFailure> {
    match read_field_value(ctx, index, field)? {
        RuntimeValue::BigInt(v) => Ok(v),
        RuntimeValue::Null => Ok(BigInt::from(0)),
        other => Err(BuildFailure::Rejected(format!(
            "{field} holds {other:?}"
        ))),
    }
}

/// Completes the success (or declared-exception) branch: charges storage
/// for the response, refunds the unused gas and re-extracts the final
/// update set.
///
/// `shape` must build the same response kind for both the trial and the
/// final encoding, so the storage charge is a pure function of the run.
pub fn finish_success<S: StateView>(
    admitted: &mut Admitted<'_, S>,
    roots: &[usize],
    shape: &dyn Fn(Vec<Update>, GasConsumption) -> TransactionResponse,
) -> Result<TransactionResponse, ExecutionError> {
    let mut all_roots = vec![admitted.caller];
    all_roots.extend_from_slice(roots);

    let trial_updates = extract_updates(&admitted.ctx, &all_roots)?;
    let trial = shape(trial_updates, snapshot(&admitted.ctx));
    let trial_bytes = to_bytes(&trial).map_err(StateError::from)?;
    admitted
        .ctx
        .gas
        .charge_storage(admitted.ctx.costs.storage_cost(trial_bytes.len()))?;

    // Refund what is left; the caller's balance update is recomputed by
    // the second extraction pass.
    let refund = BigInt::from(admitted.ctx.gas.remaining()) * BigInt::from(admitted.gas_price);
    let reserved_balance = admitted.ctx.balance_of(admitted.caller, false)?;
    admitted
        .ctx
        .set_balance(admitted.caller, false, reserved_balance + refund)?;

    let updates = extract_updates(&admitted.ctx, &all_roots)?;
    Ok(shape(updates, snapshot(&admitted.ctx)))
}

fn snapshot<S: StateView>(ctx: &ExecutionContext<'_, S>) -> GasConsumption {
    GasConsumption {
        cpu: ctx.gas.cpu,
        ram: ctx.gas.ram,
        storage: ctx.gas.storage,
    }
}

/// The penalty branch: every state effect is dropped except the caller's
/// advanced nonce and the balance debited of the full gas cost.
pub fn failure_outcome<S: StateView>(
    admitted: &Admitted<'_, S>,
    error: &ExecutionError,
    where_: &str,
) -> (Vec<Update>, GasConsumption, u64, FailureCause) {
    let caller_object = admitted.ctx.object(admitted.caller).reference;
    let balance_after = admitted.balance_before.clone() - admitted.gas_debit();
    let updates = vec![
        Update::Balance {
            object: caller_object,
            value: balance_after,
        },
        Update::Field {
            object: caller_object,
            field: FieldSignature::eoa_nonce(),
            value: UpdateValue::BigInteger(admitted.nonce_before.clone() + 1),
        },
    ];

    let gas = snapshot(&admitted.ctx);
    let penalty = admitted.gas_limit - gas.total();

    let cause = match error {
        ExecutionError::OutOfGas => FailureCause {
            class_name_of_cause: lang::OUT_OF_GAS_ERROR.into(),
            message: "the transaction ran out of gas".into(),
            where_: where_.into(),
        },
        ExecutionError::Contract {
            class_name,
            message,
            ..
        } => FailureCause {
            class_name_of_cause: class_name.name().into(),
            message: message.clone(),
            where_: where_.into(),
        },
        other => FailureCause {
            class_name_of_cause: "EngineViolationError".into(),
            message: other.to_string(),
            where_: where_.into(),
        },
    };
    (updates, gas, penalty, cause)
}

/// The view allow-list of P8: only the caller's nonce and balances may
/// change.
pub fn violates_view_contract(updates: &[Update], caller: &StorageReference) -> bool {
    updates.iter().any(|update| {
        if update.object() != caller {
            return true;
        }
        match update.field() {
            None => true,
            Some(field) => {
                field != FieldSignature::balance()
                    && field != FieldSignature::red_balance()
                    && field != FieldSignature::eoa_nonce()
            }
        }
    })
}
