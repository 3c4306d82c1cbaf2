use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use sourcify_verification::{
    settings::{ChainSettings, FallbackSettings, RpcEndpointSettings, VerifierSettings},
    verify_deployed, Address, CancellationReason, ChainError, CheckedContract, CodeKind,
    ConstructorCheckError, ContextVariables, CreationCheck, DisplayBytes, ImmutableIssue,
    ImmutablePolicy, ImmutableSource, LibraryPlaceholder, MatchStatus, MismatchCause,
    PartialReason, SourcifyChain, VerificationError, Verifier, H256,
};
use std::{collections::BTreeMap, num::NonZeroUsize, time::Duration};
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::{
    matchers::{body_partial_json, method},
    Mock, MockServer, ResponseTemplate,
};

const CREATION: &str = "608060405234801561001057600080fd5b50";
const BODY: &str = "6080604052600080fdfe";
const METADATA: &str = "a26469706673582212202e82fb6222f966f0e56dc49cd1fb8a6b5eac9bdf74f62b8a5e9d8812901095d664736f6c634300080e0033";
const METADATA_MODIFIED: &str = "a264697066735822122028c67e368422bc9c0b12226a099aa62a1facd39b08a84427d7f3efe1e37029b864736f6c634300080e0033";
const LIBRARY: &str = "contracts/Lib.sol:Lib";

fn address() -> Address {
    ethers_core::utils::get_contract_address(deployer(), 0u64)
}

fn tx_hash() -> H256 {
    H256::repeat_byte(0xab)
}

fn deployer() -> Address {
    Address::repeat_byte(0xde)
}

fn artifact(creation: &str, runtime: &str) -> Value {
    json!({
        "name": "contracts/Storage.sol:Storage",
        "compilerVersion": "v0.8.14+commit.80d49f37",
        "compilerSettings": {"optimizer": {"enabled": false, "runs": 200}},
        "sources": {"contracts/Storage.sol": "contract Storage {}"},
        "creationBytecode": format!("0x{creation}"),
        "runtimeBytecode": format!("0x{runtime}"),
        "abi": []
    })
}

fn contract(artifact: Value) -> CheckedContract {
    serde_json::from_value(artifact).expect("valid contract artifact")
}

fn simple_contract() -> CheckedContract {
    contract(artifact(
        &format!("{CREATION}{BODY}{METADATA}"),
        &format!("{BODY}{METADATA}"),
    ))
}

fn rpc_result(result: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"jsonrpc": "2.0", "id": 1, "result": result}))
}

async fn mount_code(server: &MockServer, code: &str) {
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "eth_getCode"})))
        .respond_with(rpc_result(json!(format!("0x{code}"))))
        .mount(server)
        .await;
}

async fn mount_transaction(server: &MockServer, input: &str, from: Address) {
    mount_call(server, input, from, None).await
}

async fn mount_call(server: &MockServer, input: &str, from: Address, to: Option<Address>) {
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "eth_getTransactionByHash"})))
        .respond_with(rpc_result(json!({
            "hash": tx_hash(),
            "input": format!("0x{input}"),
            "blockNumber": "0x2a",
            "from": from,
            "to": to,
            "nonce": "0x0",
        })))
        .mount(server)
        .await;
}

async fn node(code: &str) -> MockServer {
    let server = MockServer::start().await;
    mount_code(&server, code).await;
    server
}

fn chain(servers: &[&MockServer]) -> SourcifyChain {
    let settings = ChainSettings {
        chain_id: 5,
        name: "Goerli".into(),
        rpc: servers
            .iter()
            .map(|server| RpcEndpointSettings {
                url: Url::parse(&server.uri()).expect("valid mock server url"),
                timeout: Duration::from_secs(5),
                attempts: NonZeroUsize::MIN,
            })
            .collect(),
        fallback: FallbackSettings::Sequential,
    };
    SourcifyChain::try_from(&settings).expect("valid chain settings")
}

#[tokio::test]
async fn identical_bytecode_is_perfect_match() {
    let server = node(&format!("{BODY}{METADATA}")).await;

    let verdict = verify_deployed(&simple_contract(), &chain(&[&server]), address(), None, None)
        .await
        .expect("chain is available");

    assert_eq!(Some(MatchStatus::Perfect), verdict.status);
    assert_eq!(address(), verdict.address);
    assert_eq!(5, verdict.chain_id);
    assert_eq!(None, verdict.message);
    assert!(verdict.library_map.is_empty());
}

#[tokio::test]
async fn altered_metadata_is_partial_match() {
    let server = node(&format!("{BODY}{METADATA_MODIFIED}")).await;

    let verdict = verify_deployed(&simple_contract(), &chain(&[&server]), address(), None, None)
        .await
        .expect("chain is available");

    assert_eq!(Some(MatchStatus::Partial), verdict.status);
    assert_eq!(
        Some(PartialReason::MetadataMismatch.to_string()),
        verdict.message
    );
    assert_eq!(None, verdict.cause);
}

#[tokio::test]
async fn altered_body_is_not_a_match() {
    let server = node(&format!("{}{METADATA}", BODY.replacen("6040", "6041", 1))).await;

    let verdict = verify_deployed(&simple_contract(), &chain(&[&server]), address(), None, None)
        .await
        .expect("chain is available");

    assert_eq!(None, verdict.status);
    assert_eq!(
        Some(MismatchCause::BytecodeMismatch {
            code: CodeKind::Runtime,
            first_difference: 3,
            expected_length: BODY.len() / 2,
            found_length: BODY.len() / 2,
        }),
        verdict.cause
    );
    assert!(verdict.message.is_some());
}

fn library_contract(offsets: &[usize], runtime: &str) -> CheckedContract {
    let offsets: Vec<_> = offsets
        .iter()
        .map(|start| json!({"start": start, "length": 20}))
        .collect();
    let mut artifact = artifact(&format!("{CREATION}{runtime}"), runtime);
    artifact["runtimeLinkReferences"] = json!({"contracts/Lib.sol": {"Lib": offsets}});
    contract(artifact)
}

#[tokio::test]
async fn library_addresses_are_resolved() {
    let token = LibraryPlaceholder::new(LIBRARY).token().to_string();
    let contract = library_contract(&[1, 22], &format!("73{token}73{token}{BODY}{METADATA}"));
    let library = Address::repeat_byte(0x42);
    let library_hex = hex::encode(library);
    let server = node(&format!("73{library_hex}73{library_hex}{BODY}{METADATA}")).await;

    let verdict = verify_deployed(&contract, &chain(&[&server]), address(), None, None)
        .await
        .expect("chain is available");

    assert_eq!(Some(MatchStatus::Perfect), verdict.status);
    assert_eq!(
        BTreeMap::from([(LIBRARY.to_string(), library)]),
        verdict.library_map
    );
}

#[tokio::test]
async fn disagreeing_library_addresses_are_not_a_match() {
    let token = LibraryPlaceholder::new(LIBRARY).token().to_string();
    let contract = library_contract(&[1, 22], &format!("73{token}73{token}{BODY}{METADATA}"));
    let server = node(&format!(
        "73{}73{}{BODY}{METADATA}",
        "42".repeat(20),
        "43".repeat(20)
    ))
    .await;

    let verdict = verify_deployed(&contract, &chain(&[&server]), address(), None, None)
        .await
        .expect("chain is available");

    assert_eq!(None, verdict.status);
    assert!(verdict.library_map.is_empty());
    assert!(
        matches!(
            verdict.cause,
            Some(MismatchCause::LibraryAddressMismatch { ref library, offset: 22, .. })
                if library == LIBRARY
        ),
        "{:?}",
        verdict.cause
    );
}

#[tokio::test]
async fn empty_code_is_not_found_but_failing_endpoints_are_unavailable() {
    let empty = node("").await;
    let verdict = verify_deployed(&simple_contract(), &chain(&[&empty]), address(), None, None)
        .await
        .expect("chain is available");
    assert_eq!(
        Some(MismatchCause::NotFound {
            chain_id: 5,
            address: address()
        }),
        verdict.cause
    );

    let failing = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&failing)
        .await;
    let error = verify_deployed(
        &simple_contract(),
        &chain(&[&failing, &failing]),
        address(),
        None,
        None,
    )
    .await
    .expect_err("every endpoint fails");
    match error {
        VerificationError::ChainUnavailable(ChainError::Unavailable { chain_id, failures }) => {
            assert_eq!(5, chain_id);
            assert_eq!(2, failures.len());
        }
        error => panic!("unexpected error: {error:?}"),
    }
}

#[tokio::test]
async fn next_endpoint_is_used_when_previous_fails() {
    let failing = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .expect(1)
        .mount(&failing)
        .await;
    let healthy = node(&format!("{BODY}{METADATA}")).await;

    let verdict = verify_deployed(
        &simple_contract(),
        &chain(&[&failing, &healthy]),
        address(),
        None,
        None,
    )
    .await
    .expect("second endpoint is available");

    assert!(verdict.is_perfect(), "{verdict:?}");
}

#[tokio::test]
async fn constructor_arguments_are_extracted_from_creation_transaction() {
    let server = node(&format!("{BODY}{METADATA}")).await;
    mount_transaction(
        &server,
        &format!("{CREATION}{BODY}{METADATA}{}", "00".repeat(32)),
        deployer(),
    )
    .await;
    let mut artifact = artifact(
        &format!("{CREATION}{BODY}{METADATA}"),
        &format!("{BODY}{METADATA}"),
    );
    artifact["abi"] = json!([{
        "type": "constructor",
        "inputs": [{"name": "value", "type": "uint256"}]
    }]);

    let verdict = verify_deployed(
        &contract(artifact),
        &chain(&[&server]),
        address(),
        None,
        Some(tx_hash()),
    )
    .await
    .expect("chain is available");

    assert!(verdict.is_perfect(), "{verdict:?}");
    assert_eq!(
        Some(CreationCheck::Passed {
            status: MatchStatus::Perfect,
            constructor_arguments: DisplayBytes::from(vec![0u8; 32]),
        }),
        verdict.creation
    );
}

#[tokio::test]
async fn short_creation_input_fails_constructor_check_only() {
    let server = node(&format!("{BODY}{METADATA}")).await;
    mount_transaction(&server, CREATION, deployer()).await;
    let contract = simple_contract();

    let verdict = verify_deployed(&contract, &chain(&[&server]), address(), None, Some(tx_hash()))
        .await
        .expect("chain is available");

    assert!(verdict.is_perfect(), "{verdict:?}");
    match verdict.creation {
        Some(CreationCheck::Failed {
            reason: ConstructorCheckError::InputTooShort(mismatch),
        }) => {
            assert_eq!(contract.creation_bytecode().len(), mismatch.expected);
            assert_eq!(Some(CREATION.len() / 2), mismatch.found);
        }
        creation => panic!("unexpected creation check: {creation:?}"),
    }
}

#[tokio::test]
async fn missing_creation_transaction_is_not_a_match() {
    let server = node(&format!("{BODY}{METADATA}")).await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "eth_getTransactionByHash"})))
        .respond_with(rpc_result(Value::Null))
        .mount(&server)
        .await;

    let verdict = verify_deployed(
        &simple_contract(),
        &chain(&[&server]),
        address(),
        None,
        Some(tx_hash()),
    )
    .await
    .expect("chain is available");

    assert_eq!(
        Some(MismatchCause::TransactionNotFound {
            chain_id: 5,
            hash: tx_hash()
        }),
        verdict.cause
    );
}

#[tokio::test]
async fn creation_transaction_decides_when_runtime_differs() {
    // deployed runtime code was changed by the constructor
    let server = node(&format!("{}{METADATA}", BODY.replacen("fe", "00", 1))).await;
    mount_transaction(&server, &format!("{CREATION}{BODY}{METADATA}"), deployer()).await;

    let verdict = verify_deployed(
        &simple_contract(),
        &chain(&[&server]),
        address(),
        None,
        Some(tx_hash()),
    )
    .await
    .expect("chain is available");
    assert_eq!(Some(MatchStatus::Perfect), verdict.status);

    let verdict = Verifier::new(VerifierSettings {
        creation_fallback: false,
        ..Default::default()
    })
    .verify_deployed(
        &simple_contract(),
        &chain(&[&server]),
        address(),
        None,
        Some(tx_hash()),
    )
    .await
    .expect("chain is available");
    assert_eq!(None, verdict.status);
    assert!(
        matches!(verdict.creation, Some(CreationCheck::Passed { .. })),
        "{:?}",
        verdict.creation
    );
}

#[tokio::test]
async fn unrelated_transaction_cannot_replace_runtime_match() {
    let deployed = format!("{}{METADATA}", BODY.replacen("fe", "00", 1));
    let input = format!("{CREATION}{BODY}{METADATA}");
    let other_deployer = Address::repeat_byte(0x01);

    let server = node(&deployed).await;
    mount_transaction(&server, &input, other_deployer).await;
    let verdict = verify_deployed(
        &simple_contract(),
        &chain(&[&server]),
        address(),
        None,
        Some(tx_hash()),
    )
    .await
    .expect("chain is available");
    assert_eq!(None, verdict.status);
    assert!(
        matches!(verdict.cause, Some(MismatchCause::BytecodeMismatch { .. })),
        "{:?}",
        verdict.cause
    );
    assert_eq!(
        Some(CreationCheck::Failed {
            reason: ConstructorCheckError::CreatedAddressMismatch {
                expected: address(),
                created: ethers_core::utils::get_contract_address(other_deployer, 0u64),
            }
        }),
        verdict.creation
    );

    let server = node(&deployed).await;
    let target = Address::repeat_byte(0x77);
    mount_call(&server, &input, deployer(), Some(target)).await;
    let verdict = verify_deployed(
        &simple_contract(),
        &chain(&[&server]),
        address(),
        None,
        Some(tx_hash()),
    )
    .await
    .expect("chain is available");
    assert_eq!(None, verdict.status);
    assert_eq!(
        Some(CreationCheck::Failed {
            reason: ConstructorCheckError::NotContractCreation(target),
        }),
        verdict.creation
    );
}

fn immutable_contract() -> CheckedContract {
    let runtime = format!("7f{}{BODY}{METADATA}", "00".repeat(32));
    let mut artifact = artifact(&format!("{CREATION}{BODY}{METADATA}"), &runtime);
    artifact["immutableReferences"] = json!({"5": [{"start": 1, "length": 32}]});
    contract(artifact)
}

fn deployer_context() -> ContextVariables {
    ContextVariables {
        immutable_sources: BTreeMap::from([("5".to_string(), ImmutableSource::Deployer)]),
        ..Default::default()
    }
}

#[tokio::test]
async fn immutables_are_checked_against_deployment_context() {
    let deployer_word = format!("{}{}", "00".repeat(12), hex::encode(deployer()));
    let server = node(&format!("7f{deployer_word}{BODY}{METADATA}")).await;
    mount_transaction(&server, &format!("{CREATION}{BODY}{METADATA}"), deployer()).await;
    let chain = chain(&[&server]);
    let contract = immutable_contract();

    let verdict = verify_deployed(
        &contract,
        &chain,
        address(),
        Some(&deployer_context()),
        Some(tx_hash()),
    )
    .await
    .expect("chain is available");

    assert!(verdict.is_perfect(), "{verdict:?}");
    assert!(verdict.immutable_issues.is_empty());
    assert_eq!(
        BTreeMap::from([(
            "5".to_string(),
            DisplayBytes::from(hex::decode(&deployer_word).expect("valid hex"))
        )]),
        verdict.immutable_references
    );

    let context = ContextVariables {
        deployer: Some(Address::repeat_byte(0x01)),
        ..deployer_context()
    };
    let advisory = verify_deployed(&contract, &chain, address(), Some(&context), Some(tx_hash()))
        .await
        .expect("chain is available");
    assert!(advisory.is_perfect(), "{advisory:?}");
    assert!(
        matches!(
            advisory.immutable_issues.as_slice(),
            [ImmutableIssue::ValueMismatch { id, .. }] if id == "5"
        ),
        "{:?}",
        advisory.immutable_issues
    );

    let strict = Verifier::new(VerifierSettings {
        immutable_policy: ImmutablePolicy::Strict,
        ..Default::default()
    })
    .verify_deployed(&contract, &chain, address(), Some(&context), Some(tx_hash()))
    .await
    .expect("chain is available");
    assert!(strict.is_partial(), "{strict:?}");
    assert_eq!(
        Some(PartialReason::ImmutableValues.to_string()),
        strict.message
    );
}

#[tokio::test]
async fn verification_is_idempotent() {
    let token = LibraryPlaceholder::new(LIBRARY).token().to_string();
    let contract = library_contract(&[1], &format!("73{token}{BODY}{METADATA_MODIFIED}"));
    let server = node(&format!("73{}{BODY}{METADATA}", "42".repeat(20))).await;
    let chain = chain(&[&server]);

    let first = verify_deployed(&contract, &chain, address(), None, None)
        .await
        .expect("chain is available");
    let second = verify_deployed(&contract, &chain, address(), None, None)
        .await
        .expect("chain is available");

    assert!(first.is_partial(), "{first:?}");
    assert_eq!(
        serde_json::to_vec(&first).expect("serializable"),
        serde_json::to_vec(&second).expect("serializable")
    );
    assert_eq!(first, second);
}

#[tokio::test]
async fn cancellation_aborts_in_flight_requests() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            rpc_result(json!(format!("0x{BODY}{METADATA}"))).set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;
    let token = CancellationToken::new();
    let verifier = Verifier::default().with_cancellation(token.clone());
    let contract = simple_contract();
    let chain = chain(&[&server]);

    let verification = verifier.verify_deployed(&contract, &chain, address(), None, None);
    let cancel = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    };
    let (result, ()) = tokio::join!(verification, cancel);

    assert!(
        matches!(
            result,
            Err(VerificationError::Cancelled(CancellationReason::Token))
        ),
        "{result:?}"
    );
}
