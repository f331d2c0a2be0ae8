//! Coordinator and aggregator contract bindings.

use alloy_primitives::Bytes;
use alloy_sol_types::{sol, SolEvent, SolValue};

use super::Log;
use crate::error::ChainError;

sol! {
    #[derive(Debug, PartialEq, Eq)]
    event RandomWordsRequested(
        bytes32 indexed keyHash,
        uint256 requestId,
        uint256 preSeed,
        uint64 indexed accId,
        uint32 callbackGasLimit,
        uint32 numWords,
        address indexed sender,
        bool isDirectPayment
    );

    #[derive(Debug, PartialEq, Eq)]
    event DataRequested(
        uint256 indexed requestId,
        bytes32 jobId,
        uint64 indexed accId,
        uint32 callbackGasLimit,
        address indexed sender,
        bool isDirectPayment,
        uint8 numSubmission,
        bytes data
    );

    #[derive(Debug, PartialEq, Eq)]
    struct VrfProof {
        uint256[2] pk;
        uint256[4] proof;
        uint256 seed;
        uint256[2] uPoint;
        uint256[4] vComponents;
    }

    #[derive(Debug, PartialEq, Eq)]
    struct VrfCommitment {
        uint64 blockNum;
        uint64 accId;
        uint32 callbackGasLimit;
        uint32 numWords;
        address sender;
    }

    #[derive(Debug, PartialEq, Eq)]
    struct DataCommitment {
        uint64 blockNum;
        uint64 accId;
        uint32 numSubmission;
        uint32 callbackGasLimit;
        address sender;
    }

    function fulfillRandomWords(VrfProof proof, VrfCommitment rc, bool isDirectPayment);

    function fulfillDataRequestInt256(
        uint256 requestId,
        int256 response,
        DataCommitment rc,
        bool isDirectPayment
    );

    function submit(uint256 roundId, int256 submission);

    function oracleRoundState(address oracle, uint32 queriedRoundId)
        returns (
            bool eligibleToSubmit,
            uint32 roundId,
            int256 latestSubmission,
            uint64 startedAt,
            uint64 timeout,
            uint8 oracleCount
        );
}

/// Extra gas on top of the consumer's callback limit for VRF verification.
pub const VRF_FULFILL_GAS_MINIMUM: u64 = 1_000_000;
/// Extra gas per requested word.
pub const VRF_GAS_PER_WORD: u64 = 10_000;
pub const REQUEST_RESPONSE_FULFILL_GAS_MINIMUM: u64 = 400_000;
pub const DATA_FEED_SUBMIT_GAS: u64 = 400_000;

pub fn decode_random_words_requested(log: &Log) -> Result<RandomWordsRequested, ChainError> {
    RandomWordsRequested::decode_raw_log(log.topics.iter().copied(), &log.data)
        .map_err(|err| ChainError::Decode(format!("RandomWordsRequested: {err}")))
}

pub fn decode_data_requested(log: &Log) -> Result<DataRequested, ChainError> {
    DataRequested::decode_raw_log(log.topics.iter().copied(), &log.data)
        .map_err(|err| ChainError::Decode(format!("DataRequested: {err}")))
}

/// A data request's payload is an ABI-encoded `string[]` of key/value pairs.
pub fn decode_request_items(data: &Bytes) -> Result<Vec<String>, ChainError> {
    Vec::<String>::abi_decode(data)
        .map_err(|err| ChainError::Decode(format!("request data: {err}")))
}
