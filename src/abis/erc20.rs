use alloy::sol;

sol! {
    /// Only the metadata needed to scale reserves.
    #[sol(rpc)]
    interface IERC20 {
        function decimals() external view returns (uint8);
    }
}
